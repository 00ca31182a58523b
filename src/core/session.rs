//! Per-connection session: handshake, receive loop, single outbound writer.
//!
//! ```text
//! Connected -> Authenticating -> Registered -> Closed
//!      \              \________________________/^
//!       \_______________________________________/
//! ```
//!
//! The receive loop is the only place a session parks. Everything written to
//! the socket after registration goes through the connection's outbound queue
//! and is drained by one writer task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use super::registry::{ConnectionHandle, Outbound, Registry};
use super::routing::Router;
use crate::protocol::{parse_frame_of, reply, tag, Envelope, ParseError};

/// How long a closing session waits for its writer to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Registered,
    Closed,
}

impl SessionState {
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connected, Authenticating)
                | (Authenticating, Registered)
                | (Connected, Closed)
                | (Authenticating, Closed)
                | (Registered, Closed)
        )
    }
}

/// Process-wide state every session needs.
pub struct SessionContext {
    pub router: Arc<Router>,
    pub auth_secret: Arc<str>,
    pub outbound_buffer: usize,
}

impl SessionContext {
    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }
}

/// One inbound transport event, reduced to what the session cares about.
enum Inbound {
    Text(String),
    Malformed,
    Ignored,
    Closed,
    Failed(String),
}

fn classify(item: Option<std::result::Result<Message, axum::Error>>) -> Inbound {
    match item {
        Some(Ok(Message::Text(text))) => Inbound::Text(text),
        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
            Ok(text) => Inbound::Text(text),
            Err(_) => Inbound::Malformed,
        },
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Inbound::Ignored,
        Some(Ok(Message::Close(_))) | None => Inbound::Closed,
        Some(Err(e)) => Inbound::Failed(e.to_string()),
    }
}

/// Validate a first frame and register its agent.
///
/// On success the welcome is already queued on `handle`, ahead of anything
/// another session can route to the new agent. On failure the returned text
/// is the `SERVER_ERROR` content to send before closing.
pub async fn authenticate(
    ctx: &SessionContext,
    frame: &str,
    handle: &ConnectionHandle,
) -> std::result::Result<String, &'static str> {
    let (agent_id, auth_token) = match parse_frame_of(frame, &[tag::REGISTER]) {
        Ok(Envelope::Register {
            agent_id,
            auth_token,
        }) => (agent_id, auth_token),
        Ok(other) => {
            tracing::warn!(message_type = other.tag(), "first message was not a registration");
            return Err(reply::REGISTER_FIRST);
        }
        Err(ParseError::UnknownType(t)) => {
            tracing::warn!(message_type = %t, "first message was not a registration");
            return Err(reply::REGISTER_FIRST);
        }
        Err(ParseError::InvalidFormat(detail)) => {
            tracing::warn!(%detail, "malformed registration");
            return Err(reply::INVALID_FORMAT);
        }
    };

    if agent_id.is_empty() {
        tracing::warn!("registration without agent_id");
        return Err(reply::AGENT_ID_MISSING);
    }
    if auth_token != *ctx.auth_secret {
        tracing::warn!(agent_id = %agent_id, "invalid auth token");
        return Err(reply::INVALID_TOKEN);
    }

    if let Err(e) = handle.send_envelope(&Envelope::server_info(reply::WELCOME)) {
        tracing::error!(agent_id = %agent_id, error = %e, "could not queue welcome");
        return Err(reply::INTERNAL_ERROR);
    }

    if let Err(e) = ctx.registry().try_register(&agent_id, handle.clone()).await {
        tracing::warn!(error = %e, "registration rejected");
        return Err(reply::AGENT_ID_IN_USE);
    }

    Ok(agent_id)
}

/// Drain a connection's outbound queue into its socket.
///
/// Returns when the queue yields [`Outbound::Close`], every sender is gone,
/// or the socket refuses a write.
pub async fn write_loop<W>(mut sink: W, mut rx: mpsc::Receiver<Outbound>, conn_id: Arc<str>)
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display + Send,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                    tracing::warn!(conn_id = %conn_id, error = %e, "socket write failed");
                    return;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

struct Session {
    state: SessionState,
    agent_id: Option<String>,
    ctx: Arc<SessionContext>,
}

impl Session {
    fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            state: SessionState::Connected,
            agent_id: None,
            ctx,
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition(next) {
            tracing::error!(from = ?self.state, to = ?next, "illegal session transition");
            return;
        }
        tracing::debug!(agent_id = ?self.agent_id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Leave the session; a registered agent is removed from the registry.
    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let was_registered = self.state == SessionState::Registered;
        self.transition(SessionState::Closed);

        if let (true, Some(agent_id)) = (was_registered, self.agent_id.as_deref()) {
            self.ctx.registry().unregister(agent_id).await;
            let online = self.ctx.registry().len().await;
            tracing::info!(agent_id, online, "agent disconnected and unregistered");
        }
    }
}

/// Run one connection from accept to close.
///
/// `sink` and `stream` are the two halves of the connection's transport.
pub async fn run_session<W, R>(mut sink: W, mut stream: R, ctx: Arc<SessionContext>)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: std::fmt::Display + Send,
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send,
{
    let mut session = Session::new(ctx.clone());
    session.transition(SessionState::Authenticating);

    let (handle, rx) = ConnectionHandle::channel(ctx.outbound_buffer);
    tracing::debug!(conn_id = handle.conn_id(), "waiting for registration");

    let rejection = loop {
        match classify(stream.next().await) {
            Inbound::Ignored => continue,
            Inbound::Text(frame) => {
                break match authenticate(&ctx, &frame, &handle).await {
                    Ok(agent_id) => {
                        session.agent_id = Some(agent_id);
                        None
                    }
                    Err(reason) => Some(reason),
                };
            }
            Inbound::Malformed => break Some(reply::INVALID_FORMAT),
            Inbound::Closed => {
                tracing::info!(conn_id = handle.conn_id(), "connection closed before registration");
                session.close().await;
                return;
            }
            Inbound::Failed(e) => {
                tracing::error!(conn_id = handle.conn_id(), error = %e, "transport error before registration");
                session.close().await;
                return;
            }
        }
    };

    if let Some(reason) = rejection {
        // Nobody else holds this connection yet, so writing directly is still single-writer.
        drop(rx);
        match Envelope::server_error(reason).to_frame() {
            Ok(frame) => {
                let _ = sink.send(Message::Text(frame)).await;
            }
            Err(e) => tracing::error!(error = %e, "could not encode rejection"),
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
        session.close().await;
        return;
    }

    session.transition(SessionState::Registered);
    let registered_as = session.agent_id.clone().unwrap_or_default();
    let agent_id = registered_as.as_str();
    let online = ctx.registry().len().await;
    tracing::info!(agent_id, online, "agent connected and registered");

    let conn_id: Arc<str> = Arc::from(handle.conn_id());
    let mut writer = tokio::spawn(write_loop(sink, rx, conn_id));
    let mut writer_done = false;

    loop {
        tokio::select! {
            item = stream.next() => match classify(item) {
                Inbound::Text(frame) => {
                    if !handle_frame(&ctx, agent_id, &handle, &frame).await {
                        break;
                    }
                }
                Inbound::Malformed => {
                    tracing::warn!(agent_id, "non UTF-8 binary frame");
                    if let Err(e) = handle.send_envelope(&Envelope::server_error(reply::INVALID_FORMAT)) {
                        tracing::warn!(agent_id, error = %e, "could not queue reply");
                    }
                }
                Inbound::Ignored => {}
                Inbound::Closed => {
                    tracing::info!(agent_id, "connection closed normally");
                    break;
                }
                Inbound::Failed(e) => {
                    tracing::error!(agent_id, error = %e, "connection closed with error");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                tracing::warn!(agent_id, "outbound writer stopped");
                break;
            }
        }
    }

    session.close().await;

    if !writer_done {
        let flushed = tokio::time::timeout(CLOSE_GRACE, async {
            let _ = handle.close().await;
            let _ = (&mut writer).await;
        })
        .await;
        if flushed.is_err() {
            tracing::warn!(agent_id, "writer did not finish in time, aborting");
            writer.abort();
        }
    }
}

/// Route one frame. Returns `false` when the connection is no longer usable.
async fn handle_frame(
    ctx: &SessionContext,
    agent_id: &str,
    handle: &ConnectionHandle,
    frame: &str,
) -> bool {
    match ctx.router.dispatch(agent_id, handle, frame).await {
        Ok(outcome) => {
            tracing::debug!(agent_id, ?outcome, "frame handled");
            true
        }
        Err(e) => {
            tracing::error!(agent_id, error = %e, "error processing message");
            if let Err(e) = handle.send_envelope(&Envelope::server_error(reply::INTERNAL_ERROR)) {
                tracing::warn!(agent_id, error = %e, "could not report internal error");
            }
            !handle.is_closed()
        }
    }
}
