//! Prometheus metrics.
//!
//! All labels come from closed enums (event kinds, phases, timer names),
//! so label cardinality is bounded without sanitizing.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::contest::event::GameEventKind;
use crate::contest::state::Phase;
use crate::error::LootRunError;

/// Guard against installing the recorder twice.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global metrics recorder.
///
/// With `Some(port)` a Prometheus scrape endpoint listens on
/// `127.0.0.1:<port>`. With `None` metrics are recorded but not exposed.
///
/// # Errors
///
/// Returns `LootRunError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), LootRunError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| LootRunError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "lootrun_events_total",
        "Events dispatched by the contest engine, by kind"
    );
    describe_counter!(
        "lootrun_stale_timer_events_total",
        "Timer expiries dropped because the timer was cancelled or restarted"
    );
    describe_counter!(
        "lootrun_phase_transitions_total",
        "Total number of phase transitions"
    );
    describe_counter!("lootrun_timeouts_total", "Sub-phase timeouts that fired");
    describe_counter!("lootrun_rounds_resolved_total", "Rounds resolved");
    describe_counter!(
        "lootrun_send_failures_total",
        "Outbound messages dropped because the connection was gone"
    );
    describe_gauge!("lootrun_participants_connected", "Connected participants");
    describe_gauge!("lootrun_current_round", "Current round number");
}

/// Records a dispatched event.
pub fn record_event(kind: GameEventKind) {
    counter!("lootrun_events_total", "kind" => kind.as_str()).increment(1);
}

/// Records a dropped stale timer expiry.
pub fn record_stale_timer(name: &str) {
    let label = match name {
        "shop" => "shop",
        "choice" => "choice",
        "escape" => "escape",
        _ => "__unknown__",
    };
    counter!("lootrun_stale_timer_events_total", "timer" => label).increment(1);
}

/// Records a phase transition.
pub fn record_phase_transition(from: Phase, to: Phase) {
    counter!(
        "lootrun_phase_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Records a timeout that forced a sub-phase to close.
pub fn record_timeout(phase: Phase) {
    counter!("lootrun_timeouts_total", "phase" => phase.as_str()).increment(1);
}

/// Records a resolved round and updates the round gauge.
pub fn record_round_resolved(round: u32) {
    counter!("lootrun_rounds_resolved_total").increment(1);
    gauge!("lootrun_current_round").set(f64::from(round));
}

/// Records a dropped outbound message.
pub fn record_send_failure() {
    counter!("lootrun_send_failures_total").increment(1);
}

/// Sets the number of connected participants.
#[allow(clippy::cast_precision_loss)]
pub fn set_participants_connected(count: usize) {
    gauge!("lootrun_participants_connected").set(count as f64);
}
