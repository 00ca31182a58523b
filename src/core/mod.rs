//! Core module - registry, routing, and per-connection sessions.
//!
//! This module contains the heart of the relay:
//! - In-memory registry of online agents
//! - Direct, broadcast and directory routing
//! - Connection session state machine

pub mod registry;
pub mod routing;
pub mod session;

pub use registry::{AlreadyOnline, ConnectionHandle, Outbound, Registry};
pub use routing::{Dispatch, Router};
pub use session::{run_session, SessionContext, SessionState};
