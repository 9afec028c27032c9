//! Server runtime.
//!
//! The [`Server`] wires the TCP transport, the connection hub and one
//! contest engine together and runs them until the contest ends or the
//! shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GameConfig;
use crate::contest::engine::{ContestEngine, ContestSummary, EngineOptions};
use crate::contest::event::GameEvent;
use crate::error::LootRunError;
use crate::observability::events::{Event, EventEmitter};
use crate::transport::{ConnectionHub, Outbound, TcpTransport, TransportConfig};

/// Options for constructing a [`Server`].
pub struct ServerOptions {
    /// Loaded contest configuration.
    pub config: Arc<GameConfig>,
    /// Listener settings.
    pub transport: TransportConfig,
    /// Contest event stream.
    pub emitter: Arc<EventEmitter>,
    /// Token for cooperative shutdown.
    pub cancel: CancellationToken,
}

/// One contest served over TCP.
pub struct Server {
    transport: TcpTransport,
    engine: ContestEngine,
    events_tx: mpsc::UnboundedSender<GameEvent>,
    events_rx: mpsc::UnboundedReceiver<GameEvent>,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.transport)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Binds the listener and builds the contest engine.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the listen address cannot be bound.
    pub async fn bind(options: ServerOptions) -> Result<Self, LootRunError> {
        let hub = Arc::new(ConnectionHub::new());
        let transport = TcpTransport::bind(options.transport, Arc::clone(&hub)).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound: Arc<dyn Outbound> = hub;
        let engine_options = EngineOptions::from_config(&options.config, outbound)
            .with_emitter(Arc::clone(&options.emitter));
        let engine = ContestEngine::new(engine_options, events_tx.clone());

        Ok(Self {
            transport,
            engine,
            events_tx,
            events_rx,
            emitter: options.emitter,
            cancel: options.cancel,
        })
    }

    /// The bound listen address.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, LootRunError> {
        Ok(self.transport.local_addr()?)
    }

    #[must_use]
    pub fn contest_id(&self) -> &str {
        self.engine.contest_id()
    }

    /// Serves the contest to completion.
    ///
    /// Returns once the contest is over or the shutdown token fires; open
    /// connections are flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be read.
    pub async fn run(self) -> Result<ContestSummary, LootRunError> {
        let addr = self.transport.local_addr()?;
        let contest_id = self.engine.contest_id().to_string();
        info!(%addr, contest = %contest_id, "server listening");
        self.emitter.emit(Event::ServerStarted {
            timestamp: Utc::now(),
            bind: addr.to_string(),
            contest_id,
        });

        let transport_cancel = self.cancel.child_token();
        let accept = tokio::spawn(
            self.transport
                .serve(self.events_tx, transport_cancel.clone()),
        );

        let summary = self.engine.run(self.events_rx, self.cancel).await;

        transport_cancel.cancel();
        if let Err(e) = accept.await {
            warn!(error = %e, "transport task failed");
        }

        let reason = if summary.outcome.is_some() {
            "contest finished"
        } else {
            "shutdown"
        };
        info!(
            reason,
            rounds = summary.rounds_played,
            events = self.emitter.event_count(),
            "server stopped"
        );
        self.emitter.emit(Event::ServerStopped {
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        Ok(summary)
    }
}
