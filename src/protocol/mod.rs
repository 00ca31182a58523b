//! Relay wire protocol.
//!
//! One UTF-8 JSON object per websocket text frame, discriminated by `type`:
//! - `AGENT_REGISTER` opens a session
//! - `AGENT_MESSAGE`, `BROADCAST_MESSAGE`, `LIST_AGENTS_REQUEST` are routed
//! - `LIST_AGENTS_RESPONSE`, `SERVER_INFO`, `SERVER_ERROR` are relay replies

pub mod envelope;
pub mod types;

pub use envelope::{parse_frame, parse_frame_of, Envelope, ParseError};
pub use types::{reply, tag};
