//! `serve` command handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::args::ServeArgs;
use crate::config::{ConfigLoader, GameConfig};
use crate::contest::engine::ContestOutcome;
use crate::error::LootRunError;
use crate::observability::events::EventEmitter;
use crate::server::{Server, ServerOptions};
use crate::transport::TransportConfig;

/// Host one contest until it ends or `cancel` fires.
///
/// # Errors
///
/// Returns a config error if the configuration cannot be loaded, or a
/// transport/I/O error if the listener, metrics endpoint or events file
/// cannot be set up.
pub async fn run(args: &ServeArgs, cancel: CancellationToken) -> Result<(), LootRunError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let config = match &args.config {
        Some(path) => {
            tracing::info!(config = %path.display(), "loading configuration");
            let load_result = ConfigLoader::default().load(path)?;
            for warning in &load_result.warnings {
                tracing::warn!(
                    location = warning.location.as_deref().unwrap_or("<unknown>"),
                    "{}",
                    warning.message
                );
            }
            load_result.config
        }
        None => {
            tracing::info!("no configuration given, using defaults");
            Arc::new(GameConfig::default())
        }
    };

    let emitter = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    };

    let server = Server::bind(ServerOptions {
        config,
        transport: TransportConfig::new(args.bind.clone()),
        emitter: Arc::new(emitter),
        cancel,
    })
    .await?;

    let summary = server.run().await?;
    match summary.outcome {
        Some(ContestOutcome::Winner(id)) => {
            tracing::info!(winner = %id, rounds = summary.rounds_played, "contest won");
        }
        Some(outcome) => {
            tracing::info!(
                outcome = outcome.as_str(),
                rounds = summary.rounds_played,
                "adversary wins"
            );
        }
        None => tracing::info!("server stopped before the contest finished"),
    }
    Ok(())
}
