//! Named, cancellable timers that feed events back into the engine.
//!
//! Each timer is a spawned tokio task that sleeps and then sends a
//! [`GameEvent`] on the engine's inbound channel. The event carries a
//! [`TimerStamp`]; the engine calls [`TimerManager::claim`] when the event
//! reaches dispatch, and an expiry whose timer was cancelled or restarted
//! in the meantime is dropped there. Aborting the task alone cannot give
//! that guarantee, because the task may already have sent.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::contest::event::{GameEvent, GameEventKind, Payload, TimerStamp};

/// Timer bounding the shop sub-phase.
pub const SHOP_TIMER: &str = "shop";
/// Timer bounding the location choice sub-phase.
pub const CHOICE_TIMER: &str = "choice";
/// Timer bounding the escape sub-phase.
pub const ESCAPE_TIMER: &str = "escape";

struct ActiveTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Schedule table of named timers.
///
/// At most one live timer exists per name. The manager never touches
/// contest state; it only sends events.
pub struct TimerManager {
    timers: HashMap<String, ActiveTimer>,
    next_generation: u64,
    events: mpsc::UnboundedSender<GameEvent>,
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("active", &self.timers.keys().collect::<Vec<_>>())
            .field("next_generation", &self.next_generation)
            .finish_non_exhaustive()
    }
}

impl TimerManager {
    /// Creates a manager that delivers expiries on `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<GameEvent>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            events,
        }
    }

    /// Starts the timer `name`, replacing any live timer with that name.
    ///
    /// After `duration` the manager sends a `kind` event carrying `payload`
    /// and a stamp identifying this instance.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        &mut self,
        name: &str,
        duration: Duration,
        kind: GameEventKind,
        payload: Option<Payload>,
    ) {
        self.cancel(name);

        self.next_generation += 1;
        let generation = self.next_generation;

        let mut event = GameEvent::new(kind).with_payload(payload.unwrap_or_default());
        event.timer = Some(TimerStamp {
            name: name.to_string(),
            generation,
        });

        let deadline = tokio::time::Instant::now() + duration;
        let events = self.events.clone();
        let timer_name = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            trace!(timer = %timer_name, generation, "timer expired");
            // Receiver gone means the engine has shut down.
            let _ = events.send(event);
        });

        debug!(timer = name, generation, ?duration, "timer started");
        self.timers
            .insert(name.to_string(), ActiveTimer { generation, handle });
    }

    /// Cancels the timer `name`. Returns whether one was live.
    ///
    /// Idempotent. An expiry already queued for the cancelled instance is
    /// rejected by [`claim`](Self::claim).
    pub fn cancel(&mut self, name: &str) -> bool {
        self.timers.remove(name).is_some_and(|timer| {
            timer.handle.abort();
            debug!(timer = name, generation = timer.generation, "timer cancelled");
            true
        })
    }

    /// Cancels every timer. Used at game over and teardown.
    pub fn cancel_all(&mut self) {
        for (name, timer) in self.timers.drain() {
            timer.handle.abort();
            trace!(timer = %name, generation = timer.generation, "timer cancelled");
        }
    }

    /// Accepts a delivered expiry if it belongs to the live timer of that
    /// name, retiring the timer. Returns `false` for stale expiries.
    pub fn claim(&mut self, stamp: &TimerStamp) -> bool {
        match self.timers.get(&stamp.name) {
            Some(timer) if timer.generation == stamp.generation => {
                self.timers.remove(&stamp.name);
                true
            }
            _ => false,
        }
    }

    /// Whether a timer named `name` is live (started, not yet claimed or
    /// cancelled).
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Number of live timers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (TimerManager, mpsc::UnboundedReceiver<GameEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimerManager::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let (mut timers, mut rx) = manager();
        timers.start(
            CHOICE_TIMER,
            Duration::from_secs(30),
            GameEventKind::ChoiceTimeout,
            None,
        );

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, GameEventKind::ChoiceTimeout);
        let stamp = event.timer.unwrap();
        assert_eq!(stamp.name, CHOICE_TIMER);
        assert!(timers.claim(&stamp));
        assert!(!timers.is_active(CHOICE_TIMER));
    }

    #[tokio::test(start_paused = true)]
    async fn payload_is_delivered() {
        let (mut timers, mut rx) = manager();
        let mut payload = Payload::new();
        payload.insert("round".to_string(), 3.into());
        timers.start(
            SHOP_TIMER,
            Duration::from_millis(10),
            GameEventKind::ShopTimeout,
            Some(payload),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.field_index("round"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_instance() {
        let (mut timers, mut rx) = manager();
        timers.start("x", Duration::from_secs(5), GameEventKind::EscapeTimeout, None);
        timers.start("x", Duration::from_secs(5), GameEventKind::EscapeTimeout, None);
        assert_eq!(timers.active_count(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let first = rx.recv().await.unwrap();
        assert!(timers.claim(&first.timer.unwrap()));

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        let (mut timers, mut rx) = manager();
        timers.start(ESCAPE_TIMER, Duration::from_secs(1), GameEventKind::EscapeTimeout, None);
        assert!(timers.cancel(ESCAPE_TIMER));
        assert!(!timers.cancel(ESCAPE_TIMER));

        tokio::time::advance(Duration::from_secs(5)).await;
        let mut next = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_cancel_is_still_honoured() {
        let (mut timers, mut rx) = manager();
        timers.start(CHOICE_TIMER, Duration::ZERO, GameEventKind::ChoiceTimeout, None);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;

        // The expiry may already be queued; cancelling must still win.
        timers.cancel(CHOICE_TIMER);
        while let Ok(event) = rx.try_recv() {
            assert!(!timers.claim(&event.timer.unwrap()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stamp_after_restart_is_rejected() {
        let (mut timers, mut rx) = manager();
        timers.start("x", Duration::ZERO, GameEventKind::ShopTimeout, None);
        let stale = rx.recv().await.unwrap().timer.unwrap();

        timers.start("x", Duration::from_secs(10), GameEventKind::ShopTimeout, None);
        assert!(!timers.claim(&stale));
        assert!(timers.is_active("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_one_leaves_others() {
        let (mut timers, mut rx) = manager();
        timers.start(SHOP_TIMER, Duration::from_secs(1), GameEventKind::ShopTimeout, None);
        timers.start(CHOICE_TIMER, Duration::from_secs(1), GameEventKind::ChoiceTimeout, None);
        timers.cancel(SHOP_TIMER);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, GameEventKind::ChoiceTimeout);
        assert!(timers.claim(&event.timer.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_table() {
        let (mut timers, mut rx) = manager();
        timers.start(SHOP_TIMER, Duration::from_secs(1), GameEventKind::ShopTimeout, None);
        timers.start(ESCAPE_TIMER, Duration::from_secs(2), GameEventKind::EscapeTimeout, None);
        timers.cancel_all();
        assert_eq!(timers.active_count(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        let mut next = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(next.poll());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        const NAMES: [&str; 3] = [SHOP_TIMER, CHOICE_TIMER, ESCAPE_TIMER];

        proptest! {
            /// Whatever mix of starts and cancels, only the last start of
            /// each still-live name ever delivers, and it delivers once.
            #[test]
            fn only_live_timers_deliver(
                ops in prop::collection::vec((0usize..3, 0u64..5_000, any::<bool>()), 1..20)
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .start_paused(true)
                    .build()
                    .unwrap();

                runtime.block_on(async {
                    let (mut timers, mut rx) = manager();
                    let mut live = std::collections::HashSet::new();
                    for (name, millis, cancel) in ops {
                        let name = NAMES[name];
                        timers.start(
                            name,
                            Duration::from_millis(millis),
                            GameEventKind::ShopTimeout,
                            None,
                        );
                        live.insert(name);
                        if cancel {
                            timers.cancel(name);
                            live.remove(name);
                        }
                    }

                    tokio::time::sleep(Duration::from_secs(10)).await;
                    let mut claimed = Vec::new();
                    while let Ok(event) = rx.try_recv() {
                        let stamp = event.timer.unwrap();
                        if timers.claim(&stamp) {
                            claimed.push(stamp.name);
                        }
                    }
                    claimed.sort();
                    let mut expected: Vec<String> = live.iter().map(ToString::to_string).collect();
                    expected.sort();
                    assert_eq!(claimed, expected);
                });
            }
        }
    }
}
