//! Relay service (Axum + websocket upgrade).

pub mod router;
pub mod server;

pub use server::{run_relay_server, RelayService};
