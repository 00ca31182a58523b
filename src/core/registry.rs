//! In-memory registry of online agents.
//!
//! The registry is the only state shared between connections. All access
//! goes through [`Registry`]'s methods, which serialize on an internal lock;
//! the map itself is never handed out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::error::{Error, Result};
use crate::protocol::Envelope;

/// Item on a connection's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A text frame, written as-is.
    Frame(Arc<str>),
    /// Flush what is queued, send a close frame, stop writing.
    Close,
}

/// Sending side of one connection's outbound queue.
///
/// Cheap to clone. Every frame for a connection goes through its queue and is
/// written by that connection's single writer task, so frames never interleave.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Arc<str>,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh connection id, returning the queue's receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            conn_id: Arc::from(ulid::Ulid::new().to_string()),
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Queue a text frame without waiting.
    ///
    /// A full or closed queue is a delivery failure; nothing is retried.
    pub fn send_frame(&self, frame: Arc<str>) -> Result<()> {
        self.tx.try_send(Outbound::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Delivery(format!("outbound queue full for connection {}", self.conn_id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Delivery(format!("connection {} is closed", self.conn_id))
            }
        })
    }

    /// Serialize and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.send_frame(Arc::from(envelope.to_frame()?))
    }

    /// Ask the writer to flush and close. Waits for queue space.
    pub async fn close(&self) -> Result<()> {
        self.tx
            .send(Outbound::Close)
            .await
            .map_err(|_| Error::Delivery(format!("connection {} is closed", self.conn_id)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Returned by [`Registry::try_register`] when the identifier is taken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent '{0}' is already online")]
pub struct AlreadyOnline(pub String);

struct Entry {
    handle: ConnectionHandle,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Online agents keyed by identity.
///
/// Invariant: at most one entry per identity.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `agent_id` if it is not already online.
    ///
    /// Check and insert happen under one write lock, so of several concurrent
    /// attempts for the same identity exactly one succeeds.
    pub async fn try_register(
        &self,
        agent_id: &str,
        handle: ConnectionHandle,
    ) -> std::result::Result<(), AlreadyOnline> {
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(agent_id) {
            return Err(AlreadyOnline(agent_id.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .entries
            .insert(agent_id.to_string(), Entry { handle, seq });
        tracing::debug!(agent_id, online = inner.entries.len(), "registry insert");
        Ok(())
    }

    /// Remove `agent_id`. Returns whether an entry was removed; removing an
    /// absent identity is a no-op.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.remove(agent_id).is_some();
        if removed {
            tracing::debug!(agent_id, online = inner.entries.len(), "registry remove");
        }
        removed
    }

    /// Handle for sending to `agent_id`, if online.
    ///
    /// The entry may disappear right after this returns; a send on the
    /// returned handle can then fail and must be treated as a delivery failure.
    pub async fn lookup(&self, agent_id: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner.entries.get(agent_id).map(|e| e.handle.clone())
    }

    pub async fn is_online(&self, agent_id: &str) -> bool {
        self.inner.read().await.entries.contains_key(agent_id)
    }

    /// Point-in-time list of online identities, in registration order.
    pub async fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<(&String, u64)> = inner
            .entries
            .iter()
            .map(|(id, entry)| (id, entry.seq))
            .collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Call `f` for every online agent except `excluded_id`.
    ///
    /// The read lock is held for the whole walk, so the visited set is one
    /// consistent view. `f` must not block; a failing send inside it affects
    /// only that recipient.
    pub async fn for_each_except<F>(&self, excluded_id: &str, mut f: F)
    where
        F: FnMut(&str, &ConnectionHandle),
    {
        let inner = self.inner.read().await;
        for (id, entry) in inner.entries.iter() {
            if id != excluded_id {
                f(id, &entry.handle);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
