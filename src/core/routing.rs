//! Message routing for registered sessions.
//!
//! Handles:
//! - Direct messages (`AGENT_MESSAGE`) to one online agent
//! - Broadcasts (`BROADCAST_MESSAGE`) to every other online agent
//! - Directory lookups (`LIST_AGENTS_REQUEST`)
//!
//! Forwarded frames are the sender's original text. Delivery is best effort:
//! an offline or unreachable recipient is reported to the sender, never queued.

use std::sync::Arc;

use super::registry::{ConnectionHandle, Registry};
use crate::error::Result;
use crate::protocol::{parse_frame_of, reply, tag, Envelope, ParseError};

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Direct message queued for `to`.
    Forwarded { to: String },
    /// Broadcast fan-out result.
    Broadcast { delivered: usize, failed: usize },
    /// Directory reply sent with this many identities.
    Listed { agents: usize },
    /// Sender was sent a `SERVER_ERROR` with this content.
    Rejected { reason: &'static str },
}

/// Routes frames from registered sessions through the shared [`Registry`].
pub struct Router {
    registry: Arc<Registry>,
    bind_sender_identity: bool,
}

impl Router {
    pub fn new(registry: Arc<Registry>, bind_sender_identity: bool) -> Self {
        Self {
            registry,
            bind_sender_identity,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one text frame received from the session registered as `identity`.
    ///
    /// `reply` is that session's own handle. Protocol and routing problems are
    /// answered on `reply` and returned as [`Dispatch::Rejected`]; an `Err`
    /// means the reply itself could not be produced or queued.
    pub async fn dispatch(
        &self,
        identity: &str,
        reply: &ConnectionHandle,
        frame: &str,
    ) -> Result<Dispatch> {
        let envelope = match parse_frame_of(frame, &tag::ROUTABLE) {
            Ok(envelope) => envelope,
            Err(ParseError::InvalidFormat(detail)) => {
                tracing::warn!(agent_id = identity, %detail, "invalid frame");
                return reject(reply, reply::INVALID_FORMAT);
            }
            Err(ParseError::UnknownType(t)) => {
                tracing::warn!(agent_id = identity, message_type = %t, "unknown message type");
                return reject(reply, reply::UNKNOWN_MESSAGE_TYPE);
            }
        };

        match envelope {
            Envelope::Direct {
                sender_id,
                receiver_id,
                content,
            } => {
                if sender_id.is_empty() || receiver_id.is_empty() || content.is_empty() {
                    tracing::warn!(agent_id = identity, "incomplete direct message");
                    return reject(reply, reply::INCOMPLETE_MESSAGE);
                }
                if self.is_spoofed(identity, &sender_id) {
                    tracing::warn!(agent_id = identity, claimed = %sender_id, "sender_id mismatch");
                    return reject(reply, reply::SENDER_MISMATCH);
                }
                self.forward(&sender_id, &receiver_id, reply, frame).await
            }

            Envelope::Broadcast { sender_id, content } => {
                if sender_id.is_empty() || content.is_empty() {
                    tracing::warn!(agent_id = identity, "incomplete broadcast");
                    return reject(reply, reply::INCOMPLETE_MESSAGE);
                }
                if self.is_spoofed(identity, &sender_id) {
                    tracing::warn!(agent_id = identity, claimed = %sender_id, "sender_id mismatch");
                    return reject(reply, reply::SENDER_MISMATCH);
                }
                let excluded = if self.bind_sender_identity {
                    identity
                } else {
                    sender_id.as_str()
                };
                Ok(self.broadcast(excluded, frame).await)
            }

            Envelope::ListRequest { sender_id } => {
                if self.is_spoofed(identity, &sender_id) {
                    tracing::warn!(agent_id = identity, claimed = %sender_id, "sender_id mismatch");
                    return reject(reply, reply::SENDER_MISMATCH);
                }
                let requester = if self.bind_sender_identity || sender_id.is_empty() {
                    identity.to_string()
                } else {
                    sender_id
                };
                let agents = self.registry.snapshot().await;
                let count = agents.len();
                reply.send_envelope(&Envelope::list_response(agents, requester))?;
                tracing::info!(agent_id = identity, online = count, "sent agent list");
                Ok(Dispatch::Listed { agents: count })
            }

            other => {
                tracing::warn!(
                    agent_id = identity,
                    message_type = other.tag(),
                    "message type not accepted from agents"
                );
                reject(reply, reply::UNKNOWN_MESSAGE_TYPE)
            }
        }
    }

    fn is_spoofed(&self, identity: &str, claimed: &str) -> bool {
        self.bind_sender_identity && !claimed.is_empty() && claimed != identity
    }

    async fn forward(
        &self,
        sender_id: &str,
        receiver_id: &str,
        reply: &ConnectionHandle,
        frame: &str,
    ) -> Result<Dispatch> {
        let Some(target) = self.registry.lookup(receiver_id).await else {
            tracing::warn!(sender_id, receiver_id, "receiver not online, message dropped");
            return reject(reply, reply::AGENT_NOT_ONLINE);
        };

        match target.send_frame(Arc::from(frame)) {
            Ok(()) => {
                tracing::info!(sender_id, receiver_id, "routed direct message");
                Ok(Dispatch::Forwarded {
                    to: receiver_id.to_string(),
                })
            }
            Err(e) => {
                // Receiver is mid-close or not draining its queue.
                tracing::warn!(sender_id, receiver_id, error = %e, "direct delivery failed");
                reject(reply, reply::AGENT_NOT_ONLINE)
            }
        }
    }

    async fn broadcast(&self, excluded: &str, frame: &str) -> Dispatch {
        let frame: Arc<str> = Arc::from(frame);
        let mut delivered = 0;
        let mut failed = 0;

        self.registry
            .for_each_except(excluded, |agent_id, handle| {
                match handle.send_frame(frame.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        tracing::debug!(sender_id = excluded, agent_id, "broadcast delivered");
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!(sender_id = excluded, agent_id, error = %e, "broadcast delivery failed");
                    }
                }
            })
            .await;

        tracing::info!(sender_id = excluded, delivered, failed, "broadcast routed");
        Dispatch::Broadcast { delivered, failed }
    }
}

fn reject(reply: &ConnectionHandle, reason: &'static str) -> Result<Dispatch> {
    reply.send_envelope(&Envelope::server_error(reason))?;
    Ok(Dispatch::Rejected { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Outbound;
    use crate::protocol::parse_frame;
    use tokio::sync::mpsc;

    struct Peer {
        handle: ConnectionHandle,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        fn next_frame(&mut self) -> Option<String> {
            match self.rx.try_recv().ok()? {
                Outbound::Frame(f) => Some(f.to_string()),
                Outbound::Close => None,
            }
        }

        fn next_envelope(&mut self) -> Option<Envelope> {
            self.next_frame().map(|f| parse_frame(&f).unwrap())
        }
    }

    async fn online(registry: &Registry, id: &str) -> Peer {
        let (handle, rx) = ConnectionHandle::channel(16);
        registry.try_register(id, handle.clone()).await.unwrap();
        Peer { handle, rx }
    }

    fn router(registry: &Arc<Registry>) -> Router {
        Router::new(registry.clone(), true)
    }

    #[tokio::test]
    async fn test_direct_forwarded_verbatim() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;

        // Extra whitespace and an unknown field must survive forwarding.
        let frame = r#"{"type":"AGENT_MESSAGE", "sender_id":"alice","receiver_id":"bob","content":"hi","x":1}"#;
        let out = router(&registry)
            .dispatch("alice", &alice.handle, frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Forwarded { to: "bob".into() });
        assert_eq!(bob.next_frame().unwrap(), frame);
        assert!(alice.next_frame().is_none());
    }

    #[tokio::test]
    async fn test_direct_to_offline() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;

        let frame = Envelope::direct("alice", "zed", "hello").to_frame().unwrap();
        let out = router(&registry)
            .dispatch("alice", &alice.handle, &frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Rejected { reason: reply::AGENT_NOT_ONLINE });
        assert_eq!(
            alice.next_envelope().unwrap(),
            Envelope::server_error(reply::AGENT_NOT_ONLINE)
        );
        assert!(alice.next_frame().is_none());
        assert!(bob.next_frame().is_none());
    }

    #[tokio::test]
    async fn test_direct_to_closing_receiver() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let bob = online(&registry, "bob").await;
        drop(bob.rx);

        let frame = Envelope::direct("alice", "bob", "hello").to_frame().unwrap();
        let out = router(&registry)
            .dispatch("alice", &alice.handle, &frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Rejected { reason: reply::AGENT_NOT_ONLINE });
        assert_eq!(
            alice.next_envelope().unwrap(),
            Envelope::server_error(reply::AGENT_NOT_ONLINE)
        );
    }

    #[tokio::test]
    async fn test_incomplete_messages() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let router = router(&registry);

        for frame in [
            r#"{"type":"AGENT_MESSAGE","sender_id":"alice","receiver_id":"bob"}"#,
            r#"{"type":"AGENT_MESSAGE","sender_id":"alice","content":"hi"}"#,
            r#"{"type":"AGENT_MESSAGE","receiver_id":"bob","content":"hi"}"#,
            r#"{"type":"BROADCAST_MESSAGE","sender_id":"alice","content":""}"#,
            r#"{"type":"BROADCAST_MESSAGE","content":"hi"}"#,
        ] {
            let out = router.dispatch("alice", &alice.handle, frame).await.unwrap();
            assert_eq!(out, Dispatch::Rejected { reason: reply::INCOMPLETE_MESSAGE });
            assert_eq!(
                alice.next_envelope().unwrap(),
                Envelope::server_error(reply::INCOMPLETE_MESSAGE)
            );
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;
        let mut carol = online(&registry, "carol").await;

        let frame = Envelope::broadcast("alice", "standup").to_frame().unwrap();
        let out = router(&registry)
            .dispatch("alice", &alice.handle, &frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Broadcast { delivered: 2, failed: 0 });
        assert_eq!(bob.next_frame().unwrap(), frame);
        assert_eq!(carol.next_frame().unwrap(), frame);
        assert!(bob.next_frame().is_none());
        assert!(alice.next_frame().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_peer() {
        let registry = Arc::new(Registry::new());
        let alice = online(&registry, "alice").await;
        let bob = online(&registry, "bob").await;
        let mut carol = online(&registry, "carol").await;
        drop(bob.rx);

        let frame = Envelope::broadcast("alice", "still here?").to_frame().unwrap();
        let out = router(&registry)
            .dispatch("alice", &alice.handle, &frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Broadcast { delivered: 1, failed: 1 });
        assert_eq!(carol.next_frame().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_list_request() {
        let registry = Arc::new(Registry::new());
        let _alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;

        let out = router(&registry)
            .dispatch("bob", &bob.handle, r#"{"type":"LIST_AGENTS_REQUEST","sender_id":"bob"}"#)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Listed { agents: 2 });
        assert_eq!(
            bob.next_envelope().unwrap(),
            Envelope::list_response(vec!["alice".into(), "bob".into()], "bob")
        );
    }

    #[tokio::test]
    async fn test_list_request_without_sender_uses_identity() {
        let registry = Arc::new(Registry::new());
        let mut bob = online(&registry, "bob").await;

        router(&registry)
            .dispatch("bob", &bob.handle, r#"{"type":"LIST_AGENTS_REQUEST"}"#)
            .await
            .unwrap();

        assert_eq!(
            bob.next_envelope().unwrap(),
            Envelope::list_response(vec!["bob".into()], "bob")
        );
    }

    #[tokio::test]
    async fn test_unknown_and_invalid() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let router = router(&registry);

        let out = router
            .dispatch("alice", &alice.handle, r#"{"type":"DANCE"}"#)
            .await
            .unwrap();
        assert_eq!(out, Dispatch::Rejected { reason: reply::UNKNOWN_MESSAGE_TYPE });

        // Known tags that agents may not send are unknown to the router.
        let again = Envelope::register("alice", "secret").to_frame().unwrap();
        let out = router.dispatch("alice", &alice.handle, &again).await.unwrap();
        assert_eq!(out, Dispatch::Rejected { reason: reply::UNKNOWN_MESSAGE_TYPE });

        // Server-only tags stay unknown even when their fields are ill-typed.
        for frame in [
            r#"{"type":"SERVER_INFO","content":5}"#,
            r#"{"type":"LIST_AGENTS_RESPONSE","agents":"nope"}"#,
        ] {
            let out = router.dispatch("alice", &alice.handle, frame).await.unwrap();
            assert_eq!(out, Dispatch::Rejected { reason: reply::UNKNOWN_MESSAGE_TYPE });
        }

        let out = router.dispatch("alice", &alice.handle, "{oops").await.unwrap();
        assert_eq!(out, Dispatch::Rejected { reason: reply::INVALID_FORMAT });

        for _ in 0..4 {
            assert_eq!(
                alice.next_envelope().unwrap(),
                Envelope::server_error(reply::UNKNOWN_MESSAGE_TYPE)
            );
        }
        assert_eq!(
            alice.next_envelope().unwrap(),
            Envelope::server_error(reply::INVALID_FORMAT)
        );
    }

    #[tokio::test]
    async fn test_spoofed_sender_rejected() {
        let registry = Arc::new(Registry::new());
        let mut alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;

        let frame = Envelope::direct("mallory", "bob", "trust me").to_frame().unwrap();
        let out = router(&registry)
            .dispatch("alice", &alice.handle, &frame)
            .await
            .unwrap();

        assert_eq!(out, Dispatch::Rejected { reason: reply::SENDER_MISMATCH });
        assert!(bob.next_frame().is_none());
        assert_eq!(
            alice.next_envelope().unwrap(),
            Envelope::server_error(reply::SENDER_MISMATCH)
        );
    }

    #[tokio::test]
    async fn test_trusting_mode_uses_claimed_sender() {
        let registry = Arc::new(Registry::new());
        let alice = online(&registry, "alice").await;
        let mut bob = online(&registry, "bob").await;
        let router = Router::new(registry.clone(), false);

        // Broadcast exclusion follows the claimed sender: "bob" is skipped,
        // and the real sender "alice" gets her own frame back.
        let frame = Envelope::broadcast("bob", "hello").to_frame().unwrap();
        let out = router.dispatch("alice", &alice.handle, &frame).await.unwrap();
        assert_eq!(out, Dispatch::Broadcast { delivered: 1, failed: 0 });
        assert!(bob.next_frame().is_none());

        let frame = r#"{"type":"LIST_AGENTS_REQUEST","sender_id":"someone"}"#;
        router.dispatch("bob", &bob.handle, frame).await.unwrap();
        match bob.next_envelope().unwrap() {
            Envelope::ListResponse { requester_id, .. } => assert_eq!(requester_id, "someone"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_failure_is_error() {
        let registry = Arc::new(Registry::new());
        let alice = online(&registry, "alice").await;
        drop(alice.rx);

        let result = router(&registry)
            .dispatch("alice", &alice.handle, "{oops")
            .await;
        assert!(result.is_err());
    }
}
