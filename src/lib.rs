//! agentrelay library root.

pub mod agent;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod web;

pub use cli::Commands;
pub use config::{load_relay_settings, AgentSettings, RelaySettings};
pub use crate::core::{ConnectionHandle, Registry, Router, SessionState};
pub use error::{Error, Result};
pub use protocol::Envelope;
pub use web::{run_relay_server, RelayService};
