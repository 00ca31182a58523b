//! CLI commands for agentrelay using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::agent::run_agent;
use crate::config::{load_relay_settings, AgentSettings, DEFAULT_AUTH_SECRET};
use crate::web::run_relay_server;

/// agentrelay - in-memory message relay for named agents.
#[derive(Parser)]
#[command(name = "agentrelay")]
#[command(version)]
#[command(about = "Relay direct, broadcast and directory messages between agents", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server
    Serve {
        /// Settings file (defaults to ~/.agentrelay/settings.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen host, overrides settings and SERVER_HOST
        #[arg(long)]
        host: Option<String>,

        /// Listen port, overrides settings and SERVER_PORT
        #[arg(long)]
        port: Option<u16>,

        /// Trust the sender_id field of routed messages instead of the session identity
        #[arg(long)]
        trust_sender_id: bool,
    },

    /// Connect to a relay as an interactive agent
    #[command(alias = "a")]
    Agent {
        /// Identity to register under
        agent_id: String,

        /// Relay websocket URI
        #[arg(long, env = "SERVER_URI", default_value = "ws://localhost:8765")]
        server: String,

        /// Shared secret
        #[arg(long, env = "AGENT_AUTH_SECRET", default_value = DEFAULT_AUTH_SECRET, hide_env_values = true)]
        token: String,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Serve {
                config,
                host,
                port,
                trust_sender_id,
            } => cmd_serve(config.as_deref(), host.clone(), *port, *trust_sender_id).await,
            Command::Agent {
                agent_id,
                server,
                token,
            } => cmd_agent(agent_id, server, token).await,
        }
    }
}

async fn cmd_serve(
    config: Option<&std::path::Path>,
    host: Option<String>,
    port: Option<u16>,
    trust_sender_id: bool,
) -> Result<()> {
    let mut settings = load_relay_settings(config)?;
    if let Some(host) = host {
        settings.host = host;
    }
    if let Some(port) = port {
        settings.port = port;
    }
    if trust_sender_id {
        settings.bind_sender_identity = false;
        tracing::warn!("sender_id binding disabled; clients may claim any sender_id");
    }

    run_relay_server(settings).await?;
    Ok(())
}

async fn cmd_agent(agent_id: &str, server: &str, token: &str) -> Result<()> {
    let settings = AgentSettings {
        server_uri: server.to_string(),
        auth_token: token.to_string(),
    };
    run_agent(agent_id, &settings).await?;
    Ok(())
}
