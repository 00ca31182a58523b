//! Relay server using Axum.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::router::create_app_router;
use crate::config::RelaySettings;
use crate::core::{Registry, Router, SessionContext};
use crate::error::{Error, Result};

/// Owns the registry and accepts agent connections.
pub struct RelayService {
    settings: RelaySettings,
    ctx: Arc<SessionContext>,
}

impl RelayService {
    /// Create a service with an empty registry.
    pub fn new(settings: RelaySettings) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(registry, settings.bind_sender_identity));
        let ctx = Arc::new(SessionContext {
            router,
            auth_secret: Arc::from(settings.auth_secret.as_str()),
            outbound_buffer: settings.outbound_buffer,
        });
        Self { settings, ctx }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.ctx.registry()
    }

    /// Bind the listener and serve in the background.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn bind(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.settings.listen_addr();
        let listener = tokio::net::TcpListener::bind(addr.as_str())
            .await
            .map_err(|e| Error::Config(format!("Cannot listen on {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let app = create_app_router(self.ctx.clone()).layer(TraceLayer::new_for_http());

        tracing::info!("Starting relay on ws://{}", local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Relay server stopped: {}", e);
            }
        });

        Ok((local_addr, handle))
    }

    /// Serve until the server task ends or ctrl-c is received.
    pub async fn run(&self) -> Result<()> {
        let (_, handle) = self.bind().await?;

        tokio::select! {
            res = handle => {
                res.map_err(|e| Error::Other(format!("Relay server task failed: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, stopping relay");
            }
        }

        Ok(())
    }
}

/// Run the relay server with the given settings.
pub async fn run_relay_server(settings: RelaySettings) -> Result<()> {
    RelayService::new(settings).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_settings() -> RelaySettings {
        RelaySettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let service = RelayService::new(local_settings());
        let (addr, handle) = service.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(service.registry().is_empty().await);
        handle.abort();
    }

    #[tokio::test]
    async fn test_port_in_use_is_config_error() {
        let first = RelayService::new(local_settings());
        let (addr, handle) = first.bind().await.unwrap();

        let second = RelayService::new(RelaySettings {
            port: addr.port(),
            ..local_settings()
        });
        assert!(matches!(second.bind().await, Err(Error::Config(_))));
        handle.abort();
    }
}
