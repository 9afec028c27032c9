//! Newline-delimited JSON over TCP.
//!
//! Every accepted connection gets a fresh participant id and a writer
//! task fed by the [`ConnectionHub`]. Inbound lines are parsed into
//! [`ClientMessage`]s and forwarded to the engine as events; nothing here
//! touches contest state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConnectionHub, Outbound};
use crate::config::env_or;
use crate::contest::event::{GameEvent, GameEventKind};
use crate::contest::participant::ParticipantId;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Default maximum inbound line length (64 KB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default number of outbound lines queued per connection before it is
/// dropped as too slow.
pub const DEFAULT_WRITE_QUEUE: usize = 1024;

/// How long a closing connection may spend flushing queued lines.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7777";

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to listen on (`host:port`).
    pub bind_addr: String,
    /// Longest accepted inbound line in bytes.
    pub max_line_length: usize,
    /// Outbound lines queued per connection before it is closed.
    pub write_queue: usize,
}

impl TransportConfig {
    /// Configuration for `bind_addr`; the limits come from
    /// `LOOTRUN_MAX_LINE_LENGTH` and `LOOTRUN_WRITE_QUEUE` when set.
    #[must_use]
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            max_line_length: env_or("LOOTRUN_MAX_LINE_LENGTH", DEFAULT_MAX_LINE_LENGTH),
            write_queue: env_or("LOOTRUN_WRITE_QUEUE", DEFAULT_WRITE_QUEUE).max(1),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND_ADDR)
    }
}

/// Listening TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    hub: Arc<ConnectionHub>,
    config: TransportConfig,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .field("connections", &self.hub.len())
            .finish()
    }
}

impl TcpTransport {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Bind` if the address cannot be bound.
    pub async fn bind(
        config: TransportConfig,
        hub: Arc<ConnectionHub>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            hub,
            config,
        })
    }

    /// The bound address (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires, then waits for every
    /// connection task to flush and exit.
    pub async fn serve(self, events: mpsc::UnboundedSender<GameEvent>, cancel: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let connection = Connection {
                        id: ParticipantId::generate(),
                        peer,
                        hub: Arc::clone(&self.hub),
                        events: events.clone(),
                        cancel: cancel.child_token(),
                    };
                    connections.spawn(connection.run(stream, self.config.clone()));
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            }

            // Reap finished connections as we go.
            while connections.try_join_next().is_some() {}
        }

        debug!(open = connections.len(), "transport stopping");
        while connections.join_next().await.is_some() {}
    }
}

// ============================================================================
// Connection
// ============================================================================

struct Connection {
    id: ParticipantId,
    peer: SocketAddr,
    hub: Arc<ConnectionHub>,
    events: mpsc::UnboundedSender<GameEvent>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run(mut self, stream: TcpStream, config: TransportConfig) {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(config.max_line_length));
        let (mut sink, mut lines) = framed.split();

        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(config.write_queue);
        self.hub.register(self.id.clone(), writer_tx, self.cancel.clone());
        info!(participant = %self.id, peer = %self.peer, "connection opened");

        let mut writer = tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if let Err(e) = sink.send(line).await {
                    debug!(error = %e, "write failed, closing writer");
                    break;
                }
            }
        });

        let mut left = false;
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => break,
                next = lines.next() => next,
            };

            let line = match next {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.reply_error("LINE_TOO_LONG", "message exceeds the maximum line length");
                    continue;
                }
                Some(Err(e)) => {
                    debug!(participant = %self.id, error = %e, "read failed");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message = match serde_json::from_str::<ClientMessage>(line) {
                Ok(message) => message,
                Err(e) => {
                    debug!(participant = %self.id, error = %e, "unparseable message");
                    self.reply_error("INVALID_MESSAGE", e.to_string());
                    continue;
                }
            };

            match message {
                ClientMessage::Reconnect { player_id } => {
                    // Only a connection the engine has not accepted yet may
                    // take over another id.
                    if self.hub.is_member(&self.id) || self.hub.is_connected(&player_id) {
                        self.reply_error("RECONNECT_REJECTED", "cannot reclaim that player");
                        continue;
                    }
                    self.hub.rebind(&self.id, player_id.clone());
                    info!(from = %self.id, to = %player_id, "connection rebound");
                    self.id = player_id;
                    if !self.forward(GameEvent::from_participant(
                        GameEventKind::PlayerJoin,
                        self.id.clone(),
                    )) {
                        break;
                    }
                }
                message => {
                    let disconnect = matches!(message, ClientMessage::Disconnect);
                    if !self.forward(message.into_event(&self.id)) {
                        break;
                    }
                    if disconnect {
                        left = true;
                        break;
                    }
                }
            }
        }

        if !left {
            self.forward(GameEvent::from_participant(
                GameEventKind::PlayerLeave,
                self.id.clone(),
            ));
        }
        // Dropping the hub's sender lets the writer drain and stop; a peer
        // that stopped reading gets cut off.
        self.hub.unregister(&self.id);
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
            Ok(Err(e)) => debug!(error = %e, "writer task failed"),
            Ok(Ok(())) => {}
            Err(_) => {
                debug!(participant = %self.id, "writer did not drain in time, aborting");
                writer.abort();
            }
        }
        info!(participant = %self.id, peer = %self.peer, "connection closed");
    }

    /// Sends an event to the engine. Returns false once the engine is gone.
    fn forward(&self, event: GameEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn reply_error(&self, code: &str, message: impl Into<String>) {
        self.hub.send_to(&self.id, &ServerMessage::error(code, message));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;

    async fn start() -> (
        SocketAddr,
        mpsc::UnboundedReceiver<GameEvent>,
        CancellationToken,
    ) {
        let hub = Arc::new(ConnectionHub::new());
        let transport = TcpTransport::bind(TransportConfig::new("127.0.0.1:0"), hub)
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(transport.serve(tx, cancel.clone()));
        (addr, rx, cancel)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<GameEvent>) -> GameEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn forwards_messages_and_leave_on_close() {
        let (addr, mut rx, cancel) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"{\"type\":\"JOIN\",\"data\":{\"username\":\"ana\"}}\n")
            .await
            .unwrap();

        let join = recv(&mut rx).await;
        assert_eq!(join.kind, GameEventKind::PlayerJoin);
        assert_eq!(join.field_str("username"), Some("ana"));

        drop(stream);
        let leave = recv(&mut rx).await;
        assert_eq!(leave.kind, GameEventKind::PlayerLeave);
        assert_eq!(leave.participant, join.participant);
        cancel.cancel();
    }

    #[tokio::test]
    async fn garbage_gets_an_error_reply() {
        let (addr, mut rx, cancel) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(b"not json\n").await.unwrap();

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert!(line.contains("INVALID_MESSAGE"));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn reconnect_takes_over_the_old_id() {
        let (addr, mut rx, cancel) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"{\"type\":\"RECONNECT\",\"data\":{\"player_id\":\"veteran\"}}\n")
            .await
            .unwrap();
        let join = recv(&mut rx).await;
        assert_eq!(join.kind, GameEventKind::PlayerJoin);
        assert_eq!(join.participant, Some(ParticipantId::new("veteran")));

        stream
            .write_all(b"{\"type\":\"DISCONNECT\"}\n")
            .await
            .unwrap();
        let leave = recv(&mut rx).await;
        assert_eq!(leave.kind, GameEventKind::PlayerLeave);
        assert_eq!(leave.participant, Some(ParticipantId::new("veteran")));
        cancel.cancel();
    }
}
