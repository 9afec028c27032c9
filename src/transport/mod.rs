//! Transport: outbound seam and the TCP line transport.
//!
//! The engine talks to participants only through [`Outbound`]. The
//! [`ConnectionHub`] implements it for live TCP connections; tests use a
//! recording implementation.

pub mod tcp;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contest::participant::ParticipantId;
use crate::observability::metrics;
use crate::protocol::ServerMessage;

pub use tcp::{TcpTransport, TransportConfig};

/// Outbound messaging used by the engine.
///
/// Both calls are fire-and-forget: a failed delivery stays inside the
/// implementation and never reaches the caller.
pub trait Outbound: Send + Sync {
    /// Sends `message` to every tracked participant.
    fn broadcast(&self, message: &ServerMessage);

    /// Sends `message` to one participant.
    fn send_to(&self, participant: &ParticipantId, message: &ServerMessage);
}

/// One live connection as seen by the hub.
#[derive(Debug)]
struct Link {
    writer: mpsc::Sender<String>,
    /// Closes the connection when its queue overflows.
    cancel: CancellationToken,
    /// Set once the engine has accepted the connection as a participant.
    member: bool,
}

/// Registry of live connections, keyed by participant id.
///
/// Each connection owns a writer task draining a bounded queue of
/// serialized lines; the hub only enqueues. A connection whose queue is
/// full is closed instead of buffering without limit.
///
/// Broadcasts reach members only. A connection becomes a member when the
/// engine welcomes it (`WELCOME` for a join, `GAME_STATE` for a
/// reconnect), so sockets that never joined, or whose join was refused,
/// see nothing but their own replies.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    connections: DashMap<ParticipantId, Link>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the writer queue of a connection, replacing any previous
    /// queue for the same id. `cancel` is fired if the queue overflows.
    pub fn register(
        &self,
        id: ParticipantId,
        writer: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) {
        self.connections.insert(
            id,
            Link {
                writer,
                cancel,
                member: false,
            },
        );
        metrics::set_participants_connected(self.connections.len());
    }

    /// Removes a connection. Returns whether one was registered.
    pub fn unregister(&self, id: &ParticipantId) -> bool {
        let removed = self.connections.remove(id).is_some();
        metrics::set_participants_connected(self.connections.len());
        removed
    }

    /// Moves the connection registered under `from` to `to`. Membership
    /// is not carried over; the engine has to accept `to` first.
    pub fn rebind(&self, from: &ParticipantId, to: ParticipantId) -> bool {
        match self.connections.remove(from) {
            Some((_, mut link)) => {
                link.member = false;
                self.connections.insert(to, link);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_connected(&self, id: &ParticipantId) -> bool {
        self.connections.contains_key(id)
    }

    /// Whether the engine has accepted the connection behind `id`.
    #[must_use]
    pub fn is_member(&self, id: &ParticipantId) -> bool {
        self.connections.get(id).is_some_and(|link| link.member)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn encode(message: &ServerMessage) -> Option<String> {
        serde_json::to_string(message)
            .inspect_err(|e| warn!(tag = message.tag(), error = %e, "failed to encode message"))
            .ok()
    }

    /// Enqueues `line`. Returns false when the queue is full and the
    /// connection has to go.
    fn push(id: &ParticipantId, link: &Link, line: String) -> bool {
        match link.writer.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => {
                debug!(participant = %id, "dropping message for closed connection");
                metrics::record_send_failure();
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(participant = %id, "write queue full, closing connection");
                metrics::record_send_failure();
                false
            }
        }
    }

    fn drop_slow(&self, ids: Vec<ParticipantId>) {
        for id in ids {
            if let Some((_, link)) = self.connections.remove(&id) {
                link.cancel.cancel();
            }
        }
        metrics::set_participants_connected(self.connections.len());
    }
}

impl Outbound for ConnectionHub {
    fn broadcast(&self, message: &ServerMessage) {
        let Some(line) = Self::encode(message) else {
            return;
        };
        let slow: Vec<ParticipantId> = self
            .connections
            .iter()
            .filter(|entry| entry.member)
            .filter(|entry| !Self::push(entry.key(), entry.value(), line.clone()))
            .map(|entry| entry.key().clone())
            .collect();
        if !slow.is_empty() {
            self.drop_slow(slow);
        }
    }

    fn send_to(&self, participant: &ParticipantId, message: &ServerMessage) {
        let Some(line) = Self::encode(message) else {
            return;
        };
        let welcomed = matches!(
            message,
            ServerMessage::Welcome { .. } | ServerMessage::GameState { .. }
        );
        let delivered = match self.connections.get_mut(participant) {
            Some(mut link) => {
                link.member |= welcomed;
                Self::push(participant, &link, line)
            }
            None => {
                debug!(participant = %participant, tag = message.tag(), "no connection for participant");
                metrics::record_send_failure();
                true
            }
        };
        if !delivered {
            self.drop_slow(vec![participant.clone()]);
        }
    }
}
