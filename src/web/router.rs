//! Route definitions for the relay service.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;

use crate::core::{run_session, SessionContext};

/// Create the app router. `/` and `/ws` both accept agent connections.
pub fn create_app_router(ctx: Arc<SessionContext>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .with_state(ctx)
}

/// Upgrade to websocket and hand the connection to a new session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<SessionContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        run_session(sink, stream, ctx).await;
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    online: usize,
}

/// Health check endpoint.
async fn health_check(State(ctx): State<Arc<SessionContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        online: ctx.registry().len().await,
    })
}
