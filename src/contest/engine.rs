//! Contest engine.
//!
//! Owns phase, round counter, roster and the pending trackers, and
//! processes one [`GameEvent`] at a time to completion. Handlers never
//! wait for further input: they record, check the sub-phase's completion
//! predicate and either return or hand a [`Step`] to the driver, which
//! walks the phase graph until it reaches a sub-phase that needs input.
//!
//! ```text
//! lobby ─► (shop, rounds 2+) ─► choosing ─► resolving ─► (escape) ─► round_end
//!                ▲                                                      │
//!                └──────────────────────────────────────────────────────┤
//!                                                                       ▼
//!                                                                  game_over
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{ContestConfig, GameConfig};
use crate::contest::event::{GameEvent, GameEventKind, Payload};
use crate::contest::participant::{Participant, ParticipantId, RoundRecord, Roster, Standing};
use crate::contest::pending::{PendingChoices, PendingEscapes, StakeContext};
use crate::contest::state::{Phase, PhaseTransition};
use crate::contest::timers::{CHOICE_TIMER, ESCAPE_TIMER, SHOP_TIMER, TimerManager};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::protocol::{
    LobbyPlayer, LobbySettings, LocationView, ModifierView, PlayerRoundResult, ServerMessage,
};
use crate::rules::{
    Adversary, ConfiguredWorld, EscapeAdversary, EscapeGuess, HiddenChoice,
    PatternEscapeAdversary, PopularityAdversary, World,
};
use crate::transport::Outbound;

/// Longest display name kept from a join request.
const MAX_NAME_LEN: usize = 24;

// ============================================================================
// Options
// ============================================================================

/// Everything an engine needs besides its inbound channel.
pub struct EngineOptions {
    pub contest_id: String,
    pub contest: ContestConfig,
    pub world: Box<dyn World>,
    pub adversary: Box<dyn Adversary>,
    pub escape_adversary: Box<dyn EscapeAdversary>,
    pub outbound: Arc<dyn Outbound>,
    pub emitter: Arc<EventEmitter>,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("contest_id", &self.contest_id)
            .field("contest", &self.contest)
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    /// Options using the configured world and the default adversaries.
    #[must_use]
    pub fn from_config(config: &GameConfig, outbound: Arc<dyn Outbound>) -> Self {
        let mut contest_id = uuid::Uuid::new_v4().simple().to_string();
        contest_id.truncate(8);
        Self {
            contest_id,
            contest: config.contest.clone(),
            world: Box::new(ConfiguredWorld::new(&config.world)),
            adversary: Box::new(PopularityAdversary),
            escape_adversary: Box::new(PatternEscapeAdversary),
            outbound,
            emitter: Arc::new(EventEmitter::noop()),
        }
    }

    /// Replaces the contest event emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }
}

/// How a contest ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContestOutcome {
    /// An alive participant reached the win threshold.
    Winner(ParticipantId),
    /// Nobody is left alive; the adversary wins.
    AllEliminated,
    /// Nobody alive is still connected.
    Abandoned,
}

impl ContestOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Winner(_) => "winner",
            Self::AllEliminated => "all_eliminated",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Final state returned by [`ContestEngine::run`].
#[derive(Debug, Clone)]
pub struct ContestSummary {
    pub outcome: Option<ContestOutcome>,
    pub rounds_played: u32,
    pub standings: Vec<Standing>,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Phase-graph work left after a handler returns.
#[derive(Debug)]
enum Step {
    StartRound,
    OpenShop,
    OpenChoosing,
    Resolve,
    OpenEscape(Vec<Caught>),
    CloseEscape,
    FinishRound,
}

#[derive(Debug)]
struct Caught {
    id: ParticipantId,
    location_index: usize,
    stake: u32,
}

type Handler = fn(&mut ContestEngine, &GameEvent) -> Option<Step>;

/// The dispatch table. Tags without a handler are informational and
/// ignored when delivered.
fn route(kind: GameEventKind) -> Option<Handler> {
    let handler: Handler = match kind {
        GameEventKind::PlayerJoin => ContestEngine::on_join,
        GameEventKind::PlayerLeave => ContestEngine::on_leave,
        GameEventKind::PlayerReady => ContestEngine::on_ready,
        GameEventKind::PlayerUnready => ContestEngine::on_unready,
        GameEventKind::GameStart => ContestEngine::on_game_start,
        GameEventKind::ShopPurchase => ContestEngine::on_shop_purchase,
        GameEventKind::ShopSkip => ContestEngine::on_shop_skip,
        GameEventKind::ShopTimeout => ContestEngine::on_shop_timeout,
        GameEventKind::LocationChoice => ContestEngine::on_location_choice,
        GameEventKind::ChoiceTimeout => ContestEngine::on_choice_timeout,
        GameEventKind::EscapeChoice => ContestEngine::on_escape_choice,
        GameEventKind::EscapeTimeout => ContestEngine::on_escape_timeout,
        GameEventKind::RoundStart | GameEventKind::RoundComplete | GameEventKind::GameOver => {
            return None;
        }
    };
    Some(handler)
}

const fn timer_for(phase: Phase) -> Option<&'static str> {
    match phase {
        Phase::Shop => Some(SHOP_TIMER),
        Phase::Choosing => Some(CHOICE_TIMER),
        Phase::Escape => Some(ESCAPE_TIMER),
        _ => None,
    }
}

fn secs(duration: Duration) -> u64 {
    duration.as_secs()
}

// ============================================================================
// Engine
// ============================================================================

/// The contest state machine. One instance per contest.
pub struct ContestEngine {
    contest_id: String,
    config: ContestConfig,
    phase: Phase,
    round: u32,
    roster: Roster,
    choices: PendingChoices<usize>,
    shop_done: PendingChoices<()>,
    escapes: PendingEscapes,
    timers: TimerManager,
    world: Box<dyn World>,
    adversary: Box<dyn Adversary>,
    escape_adversary: Box<dyn EscapeAdversary>,
    outbound: Arc<dyn Outbound>,
    emitter: Arc<EventEmitter>,
    rng: StdRng,
    outcome: Option<ContestOutcome>,
    last_search: Option<usize>,
    started_at: Option<DateTime<Utc>>,
    transitions: Vec<PhaseTransition>,
}

impl std::fmt::Debug for ContestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContestEngine")
            .field("contest_id", &self.contest_id)
            .field("phase", &self.phase)
            .field("round", &self.round)
            .field("participants", &self.roster.len())
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

impl ContestEngine {
    /// Creates an engine in the lobby.
    ///
    /// `events` is the sending half of the engine's own inbound channel;
    /// timers deliver their expiries through it.
    #[must_use]
    pub fn new(options: EngineOptions, events: mpsc::UnboundedSender<GameEvent>) -> Self {
        let rng = options
            .contest
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Self {
            contest_id: options.contest_id,
            config: options.contest,
            phase: Phase::Lobby,
            round: 0,
            roster: Roster::new(),
            choices: PendingChoices::new(),
            shop_done: PendingChoices::new(),
            escapes: PendingEscapes::new(),
            timers: TimerManager::new(events),
            world: options.world,
            adversary: options.adversary,
            escape_adversary: options.escape_adversary,
            outbound: options.outbound,
            emitter: options.emitter,
            rng,
            outcome: None,
            last_search: None,
            started_at: None,
            transitions: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn contest_id(&self) -> &str {
        &self.contest_id
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn round(&self) -> u32 {
        self.round
    }

    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.roster.get(id)
    }

    /// Participants in join order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.roster.iter()
    }

    /// Winner of a finished contest, if any.
    #[must_use]
    pub fn winner(&self) -> Option<&ParticipantId> {
        match &self.outcome {
            Some(ContestOutcome::Winner(id)) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn outcome(&self) -> Option<&ContestOutcome> {
        self.outcome.as_ref()
    }

    /// Every phase transition so far, oldest first.
    #[must_use]
    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    #[must_use]
    pub const fn pending_choices(&self) -> &PendingChoices<usize> {
        &self.choices
    }

    #[must_use]
    pub const fn pending_escapes(&self) -> &PendingEscapes {
        &self.escapes
    }

    #[must_use]
    pub const fn timers(&self) -> &TimerManager {
        &self.timers
    }

    #[must_use]
    pub fn standings(&self) -> Vec<Standing> {
        self.roster.standings()
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Processes one event to completion.
    ///
    /// Never fails: malformed, stale or out-of-phase events are dropped.
    pub async fn deliver(&mut self, event: GameEvent) {
        if let Some(stamp) = &event.timer {
            if !self.timers.claim(stamp) {
                debug!(timer = %stamp.name, generation = stamp.generation, "dropping stale timer event");
                metrics::record_stale_timer(&stamp.name);
                return;
            }
        }

        metrics::record_event(event.kind);

        let Some(handler) = route(event.kind) else {
            trace!(kind = %event.kind, "no handler for event, ignoring");
            return;
        };

        let next = handler(self, &event);
        self.drive(next).await;
    }

    /// Consumes events until the contest ends, the channel closes or
    /// `cancel` fires.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<GameEvent>,
        cancel: CancellationToken,
    ) -> ContestSummary {
        info!(contest = %self.contest_id, "contest engine running");
        while !self.phase.is_terminal() {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(contest = %self.contest_id, "contest engine cancelled");
                    break;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            self.deliver(event).await;
        }
        self.shutdown();

        ContestSummary {
            outcome: self.outcome.clone(),
            rounds_played: self.round,
            standings: self.roster.standings(),
        }
    }

    /// Cancels every timer.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
    }

    async fn drive(&mut self, mut next: Option<Step>) {
        while let Some(step) = next {
            trace!(?step, round = self.round, "driving");
            next = match step {
                Step::StartRound => self.start_round(),
                Step::OpenShop => self.open_shop(),
                Step::OpenChoosing => self.open_choosing(),
                Step::Resolve => self.resolve_round().await,
                Step::OpenEscape(caught) => self.open_escape(caught),
                Step::CloseEscape => self.close_escape(),
                Step::FinishRound => self.finish_round(),
            };
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        if let Some(timer) = timer_for(from) {
            self.timers.cancel(timer);
        }
        self.phase = to;
        self.transitions.push(PhaseTransition {
            from,
            to,
            round: self.round,
            at: tokio::time::Instant::now(),
        });
        metrics::record_phase_transition(from, to);
        info!(from = %from, to = %to, round = self.round, "phase transition");
    }

    // ------------------------------------------------------------------------
    // Participant lifecycle
    // ------------------------------------------------------------------------

    fn on_join(&mut self, event: &GameEvent) -> Option<Step> {
        let id = event.participant.clone()?;

        if let Some(participant) = self.roster.get_mut(&id) {
            if participant.connected {
                debug!(participant = %id, "join from connected participant, ignoring");
                return None;
            }
            participant.connected = true;
            info!(participant = %id, phase = %self.phase, "participant reconnected");
            self.outbound.send_to(&id, &self.game_state());
            return None;
        }

        if self.phase != Phase::Lobby {
            self.outbound.send_to(
                &id,
                &ServerMessage::error("CONTEST_IN_PROGRESS", "the contest has already started"),
            );
            return None;
        }
        if self.roster.len() >= self.config.max_players {
            self.outbound
                .send_to(&id, &ServerMessage::error("CONTEST_FULL", "the lobby is full"));
            return None;
        }

        let name = event
            .field_str("username")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("Player_{}", id.as_str().chars().take(8).collect::<String>()),
                |name| name.chars().take(MAX_NAME_LEN).collect(),
            );

        self.roster.add(id.clone(), name);
        info!(participant = %id, players = self.roster.len(), "participant joined");

        self.outbound.send_to(
            &id,
            &ServerMessage::Welcome {
                player_id: id.clone(),
                contest_id: self.contest_id.clone(),
            },
        );
        self.broadcast_lobby();
        None
    }

    fn on_leave(&mut self, event: &GameEvent) -> Option<Step> {
        let id = event.participant.as_ref()?;

        if self.phase == Phase::Lobby {
            let participant = self.roster.remove(id)?;
            info!(participant = %id, "participant left the lobby");
            self.outbound.broadcast(&ServerMessage::PlayerLeft {
                player_id: id.clone(),
                username: participant.name,
            });
            self.broadcast_lobby();
            return self.auto_start();
        }

        let participant = self.roster.get_mut(id).filter(|p| p.connected)?;
        participant.connected = false;
        let username = participant.name.clone();
        info!(participant = %id, phase = %self.phase, "participant disconnected");
        self.outbound.broadcast(&ServerMessage::PlayerLeft {
            player_id: id.clone(),
            username,
        });

        // The required set just shrank; it may have been the last holdout.
        match self.phase {
            Phase::Shop => self.check_shop_done(),
            Phase::Choosing => self.check_choices_done(),
            _ => None,
        }
    }

    fn on_ready(&mut self, event: &GameEvent) -> Option<Step> {
        if self.set_ready(event, true) {
            self.auto_start()
        } else {
            None
        }
    }

    fn on_unready(&mut self, event: &GameEvent) -> Option<Step> {
        self.set_ready(event, false);
        None
    }

    /// Updates a lobby participant's ready flag. Returns whether it changed.
    fn set_ready(&mut self, event: &GameEvent, ready: bool) -> bool {
        if self.phase != Phase::Lobby {
            return false;
        }
        let Some(id) = event.participant.as_ref() else {
            return false;
        };
        let Some(participant) = self.roster.get_mut(id) else {
            return false;
        };
        if participant.ready == ready {
            return false;
        }
        participant.ready = ready;
        let username = participant.name.clone();

        debug!(participant = %id, ready, "ready state changed");
        self.outbound.broadcast(&ServerMessage::PlayerReady {
            player_id: id.clone(),
            username,
            ready,
        });
        true
    }

    fn on_game_start(&mut self, event: &GameEvent) -> Option<Step> {
        if let Some(id) = &event.participant {
            if !self.roster.contains(id) {
                return None;
            }
        }
        self.try_start()
    }

    fn auto_start(&mut self) -> Option<Step> {
        if self.config.auto_start {
            self.try_start()
        } else {
            None
        }
    }

    /// Leaves the lobby when every connected participant is ready and
    /// enough of them are connected.
    fn try_start(&mut self) -> Option<Step> {
        if self.phase != Phase::Lobby {
            debug!(phase = %self.phase, "start requested outside the lobby");
            return None;
        }
        let connected = self.roster.connected_ids();
        if connected.len() < self.config.min_players || !self.roster.all_connected_ready() {
            debug!(
                connected = connected.len(),
                min_players = self.config.min_players,
                "start conditions not met"
            );
            return None;
        }

        self.started_at = Some(Utc::now());
        info!(contest = %self.contest_id, players = connected.len(), "contest started");

        self.outbound.broadcast(&ServerMessage::GameStarted {
            contest_id: self.contest_id.clone(),
            players: self.lobby_players(),
            win_threshold: self.config.win_threshold,
        });
        self.emitter.emit(Event::ContestStarted {
            timestamp: Utc::now(),
            contest_id: self.contest_id.clone(),
            participants: connected,
        });
        Some(Step::StartRound)
    }

    // ------------------------------------------------------------------------
    // Shop
    // ------------------------------------------------------------------------

    fn on_shop_purchase(&mut self, event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Shop {
            return None;
        }
        let id = event.participant.as_ref()?;
        let item_id = event.field_str("item_id")?;
        if !self.roster.get(id).is_some_and(Participant::is_required) {
            return None;
        }

        let item = self
            .world
            .shop_items()
            .iter()
            .find(|item| item.id == item_id)
            .cloned();
        let participant = self.roster.get_mut(id)?;

        let result = match item {
            None => Err("no such item"),
            Some(item) if participant.owns(&item.id) => Err("already owned"),
            Some(item) if participant.points < item.cost => Err("not enough points"),
            Some(item) => {
                participant.points -= item.cost;
                participant.owned_items.push(item);
                Ok(())
            }
        };
        let points = participant.points;

        debug!(participant = %id, item = item_id, ok = result.is_ok(), "shop purchase");
        self.outbound.send_to(
            id,
            &ServerMessage::PurchaseResult {
                player_id: id.clone(),
                item_id: item_id.to_string(),
                success: result.is_ok(),
                points,
                message: result.err().unwrap_or("purchased").to_string(),
            },
        );
        None
    }

    fn on_shop_skip(&mut self, event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Shop {
            return None;
        }
        let id = event.participant.as_ref()?;
        if !self.roster.get(id).is_some_and(Participant::is_required) {
            return None;
        }
        if !self.shop_done.record(id, ()) {
            return None;
        }
        self.check_shop_done()
    }

    fn on_shop_timeout(&mut self, _event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Shop {
            return None;
        }
        metrics::record_timeout(Phase::Shop);
        info!(round = self.round, "shop closed by timeout");
        Some(Step::OpenChoosing)
    }

    fn check_shop_done(&self) -> Option<Step> {
        let required = self.roster.required_ids();
        self.shop_done
            .all_submitted(&required)
            .then_some(Step::OpenChoosing)
    }

    // ------------------------------------------------------------------------
    // Location choice
    // ------------------------------------------------------------------------

    fn on_location_choice(&mut self, event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Choosing {
            return None;
        }
        let id = event.participant.as_ref()?;
        let index = event.field_index("location_index")?;
        if index >= self.world.options().len() {
            debug!(participant = %id, index, "location index out of range");
            return None;
        }
        let username = self.roster.get(id).filter(|p| p.is_required())?.name.clone();

        if !self.choices.record(id, index) {
            debug!(participant = %id, "duplicate location choice ignored");
            return None;
        }

        self.outbound.broadcast(&ServerMessage::PlayerSubmitted {
            player_id: id.clone(),
            username,
        });
        self.check_choices_done()
    }

    fn on_choice_timeout(&mut self, _event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Choosing {
            return None;
        }
        metrics::record_timeout(Phase::Choosing);

        let option_count = self.world.options().len();
        if option_count > 0 {
            for id in self.roster.required_ids() {
                if self.choices.has(&id) {
                    continue;
                }
                let index = self.rng.random_range(0..option_count);
                self.choices.record(&id, index);
                info!(participant = %id, location = index, "location assigned on timeout");
                self.notify_timeout(&id, Phase::Choosing);
            }
        }
        Some(Step::Resolve)
    }

    fn check_choices_done(&self) -> Option<Step> {
        let required = self.roster.required_ids();
        if !self.choices.all_submitted(&required) {
            return None;
        }
        let players_submitted = self
            .roster
            .iter()
            .filter(|p| self.choices.has(&p.id))
            .map(|p| p.name.clone())
            .collect();
        self.outbound
            .broadcast(&ServerMessage::AllChoicesLocked { players_submitted });
        Some(Step::Resolve)
    }

    // ------------------------------------------------------------------------
    // Escape
    // ------------------------------------------------------------------------

    fn on_escape_choice(&mut self, event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Escape {
            return None;
        }
        let id = event.participant.as_ref()?;
        let option_id = event.field_str("option_id")?;
        if !self.escapes.record_choice(id, option_id) {
            debug!(participant = %id, option = option_id, "escape choice rejected");
            return None;
        }
        debug!(participant = %id, option = option_id, "escape choice recorded");
        self.escapes.all_resolved().then_some(Step::CloseEscape)
    }

    fn on_escape_timeout(&mut self, _event: &GameEvent) -> Option<Step> {
        if self.phase != Phase::Escape {
            return None;
        }
        metrics::record_timeout(Phase::Escape);

        for id in self.escapes.unresolved_ids() {
            let option_id = self
                .escapes
                .get(&id)
                .and_then(|entry| entry.options.choose(&mut self.rng))
                .map(|option| option.id.clone());
            if let Some(option_id) = option_id {
                self.escapes.record_choice(&id, &option_id);
                info!(participant = %id, option = %option_id, "escape assigned on timeout");
                self.notify_timeout(&id, Phase::Escape);
            }
        }
        Some(Step::CloseEscape)
    }

    // ------------------------------------------------------------------------
    // Phase graph
    // ------------------------------------------------------------------------

    fn start_round(&mut self) -> Option<Step> {
        self.round += 1;
        self.choices.clear();
        self.shop_done.clear();
        self.escapes.clear();
        self.world.advance_modifiers(&mut self.rng);
        info!(round = self.round, "round started");

        if self.round == 1 {
            Some(Step::OpenChoosing)
        } else {
            Some(Step::OpenShop)
        }
    }

    fn open_shop(&mut self) -> Option<Step> {
        self.set_phase(Phase::Shop);
        self.broadcast_phase();

        let items = self.world.shop_items().to_vec();
        let timer_seconds = secs(self.config.shop_timer);
        for participant in self.roster.iter().filter(|p| p.is_required()) {
            self.outbound.send_to(
                &participant.id,
                &ServerMessage::ShopState {
                    player_id: participant.id.clone(),
                    points: participant.points,
                    items: items.clone(),
                    owned: participant.owned_items.iter().map(|i| i.id.clone()).collect(),
                    timer_seconds,
                },
            );
        }

        self.timers.start(
            SHOP_TIMER,
            self.config.shop_timer,
            GameEventKind::ShopTimeout,
            Some(self.round_payload()),
        );
        self.check_shop_done()
    }

    fn open_choosing(&mut self) -> Option<Step> {
        self.set_phase(Phase::Choosing);
        self.choices.clear();

        let locations = self
            .world
            .options()
            .iter()
            .enumerate()
            .map(|(index, option)| LocationView {
                index,
                name: option.name.clone(),
                emoji: option.emoji.clone(),
                base_points: option.base_points,
            })
            .collect();
        let active_modifiers = self
            .world
            .active_modifiers()
            .iter()
            .map(|active| ModifierView {
                id: active.modifier.id.clone(),
                name: active.modifier.name.clone(),
                emoji: active.modifier.emoji.clone(),
                description: active.modifier.description.clone(),
                location_index: active.location_index,
                rounds_remaining: active.rounds_remaining,
            })
            .collect();

        self.outbound.broadcast(&ServerMessage::RoundStart {
            round: self.round,
            timer_seconds: secs(self.config.choice_timer),
            server_timestamp: Utc::now().timestamp_millis(),
            locations,
            active_modifiers,
            standings: self.roster.standings(),
            previous_search: self.last_search.map(|i| self.location_name(i)),
        });

        self.timers.start(
            CHOICE_TIMER,
            self.config.choice_timer,
            GameEventKind::ChoiceTimeout,
            Some(self.round_payload()),
        );
        self.check_choices_done()
    }

    async fn resolve_round(&mut self) -> Option<Step> {
        self.set_phase(Phase::Resolving);
        self.broadcast_phase();

        let pause = self.config.resolve_pause;
        self.outbound.broadcast(&ServerMessage::AdversaryAnalyzing {
            duration_ms: u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
        });
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let picks: Vec<(ParticipantId, usize)> = self
            .roster
            .iter()
            .filter(|p| p.alive)
            .filter_map(|p| self.choices.get(&p.id).map(|index| (p.id.clone(), *index)))
            .collect();

        let decision = {
            let hidden: Vec<HiddenChoice<'_>> = picks
                .iter()
                .filter_map(|(id, index)| {
                    self.roster.get(id).map(|participant| HiddenChoice {
                        participant,
                        location_index: *index,
                    })
                })
                .collect();
            self.adversary
                .decide(self.world.options(), &hidden, &mut self.rng)
        };
        let searched = decision
            .searched
            .min(self.world.options().len().saturating_sub(1));
        self.last_search = Some(searched);

        let mut results = Vec::with_capacity(picks.len());
        let mut caught = Vec::new();
        for (id, index) in picks {
            let Some(participant) = self.roster.get(&id) else {
                continue;
            };
            let stake = self.world.roll_stake(index, participant, &mut self.rng);
            let location = self.location_name(index);
            let prediction = decision.predictions.iter().find(|p| p.participant == id);
            let predicted_location = prediction.map(|p| self.location_name(p.location_index));

            let Some(participant) = self.roster.get_mut(&id) else {
                continue;
            };
            participant.choice_history.push(index);
            let is_caught = index == searched;
            let points_earned = if is_caught {
                0
            } else {
                participant.points = participant.points.saturating_add(stake);
                participant.round_history.push(RoundRecord {
                    round: self.round,
                    location_index: index,
                    caught: false,
                    escape_option: None,
                    points_earned: stake,
                });
                stake
            };

            results.push(PlayerRoundResult {
                player_id: id.clone(),
                username: participant.name.clone(),
                location,
                caught: is_caught,
                points_earned,
                total_points: participant.points,
                predicted_location,
                confidence: prediction.map(|p| p.confidence),
            });
            if is_caught {
                caught.push(Caught {
                    id,
                    location_index: index,
                    stake,
                });
            }
        }

        let searched_name = self.location_name(searched);
        info!(
            round = self.round,
            searched = %searched_name,
            caught = caught.len(),
            "round resolved"
        );
        metrics::record_round_resolved(self.round);
        self.emitter.emit(Event::RoundResolved {
            timestamp: Utc::now(),
            round: self.round,
            searched: searched_name.clone(),
            caught: caught.iter().map(|c| c.id.clone()).collect(),
        });
        self.outbound.broadcast(&ServerMessage::RoundResult {
            round: self.round,
            searched: searched_name,
            reasoning: decision.reasoning,
            results,
            standings: self.roster.standings(),
        });

        if caught.is_empty() {
            Some(Step::FinishRound)
        } else {
            Some(Step::OpenEscape(caught))
        }
    }

    fn open_escape(&mut self, caught: Vec<Caught>) -> Option<Step> {
        self.set_phase(Phase::Escape);
        self.escapes.clear();
        self.broadcast_phase();

        let timer_seconds = secs(self.config.escape_timer);
        for Caught {
            id,
            location_index,
            stake,
        } in caught
        {
            let location = self.location_name(location_index);
            let options = self.world.escape_options(location_index);
            let Some(participant) = self.roster.get(&id) else {
                continue;
            };

            self.outbound.broadcast(&ServerMessage::PlayerCaught {
                player_id: id.clone(),
                username: participant.name.clone(),
                location: location.clone(),
                stake,
            });

            if options.is_empty() {
                self.eliminate(&id, location_index, None);
                continue;
            }

            let guess = self
                .escape_adversary
                .predict(participant, &options, &mut self.rng);
            debug!(participant = %id, guess = %guess.option_id, "escape prediction made");

            self.outbound.send_to(
                &id,
                &ServerMessage::EscapePhase {
                    player_id: id.clone(),
                    location: location.clone(),
                    stake,
                    options: options.clone(),
                    timer_seconds,
                },
            );
            self.escapes.add_pending(
                id,
                StakeContext {
                    location_index,
                    location_name: location,
                    stake,
                },
                options,
                guess.option_id,
                guess.reasoning,
            );
        }

        if self.escapes.is_empty() {
            return Some(Step::FinishRound);
        }
        self.timers.start(
            ESCAPE_TIMER,
            self.config.escape_timer,
            GameEventKind::EscapeTimeout,
            Some(self.round_payload()),
        );
        None
    }

    fn close_escape(&mut self) -> Option<Step> {
        let entries: Vec<_> = self.escapes.entries().cloned().collect();
        self.escapes.clear();

        for entry in entries {
            let Some(chosen) = entry.chosen_option().cloned() else {
                continue;
            };
            let guess = EscapeGuess {
                option_id: entry.adversary_guess.clone(),
                reasoning: entry.adversary_reasoning.clone(),
            };
            let Some(participant) = self.roster.get(&entry.participant) else {
                continue;
            };
            let outcome =
                self.escape_adversary
                    .resolve(&chosen, &guess, entry.stake.stake, participant);

            let Some(participant) = self.roster.get_mut(&entry.participant) else {
                continue;
            };
            participant.escape_history.push(chosen.id.clone());
            if outcome.escaped {
                participant.points = participant.points.saturating_add(outcome.retained);
                participant.round_history.push(RoundRecord {
                    round: self.round,
                    location_index: entry.stake.location_index,
                    caught: true,
                    escape_option: Some(chosen.id.clone()),
                    points_earned: outcome.retained,
                });
            }
            let username = participant.name.clone();
            let total_points = participant.points;

            info!(
                participant = %entry.participant,
                choice = %chosen.id,
                guess = %guess.option_id,
                escaped = outcome.escaped,
                "escape resolved"
            );
            self.outbound.broadcast(&ServerMessage::EscapeResult {
                player_id: entry.participant.clone(),
                username,
                choice: chosen.id.clone(),
                guess: guess.option_id.clone(),
                reasoning: guess.reasoning,
                escaped: outcome.escaped,
                points_kept: outcome.retained,
                total_points,
            });
            self.emitter.emit(Event::EscapeResolved {
                timestamp: Utc::now(),
                round: self.round,
                participant: entry.participant.clone(),
                choice: chosen.id.clone(),
                guess: guess.option_id,
                escaped: outcome.escaped,
                points_kept: outcome.retained,
            });

            if !outcome.escaped {
                self.eliminate(&entry.participant, entry.stake.location_index, Some(chosen.id));
            }
        }
        Some(Step::FinishRound)
    }

    fn finish_round(&mut self) -> Option<Step> {
        self.set_phase(Phase::RoundEnd);
        self.broadcast_phase();

        match self.contest_outcome() {
            Some(outcome) => {
                self.finish_contest(outcome);
                None
            }
            None => Some(Step::StartRound),
        }
    }

    fn contest_outcome(&self) -> Option<ContestOutcome> {
        let threshold = self.config.win_threshold;
        let winner = self
            .roster
            .iter()
            .filter(|p| p.alive && p.points >= threshold)
            .max_by(|a, b| {
                a.points
                    .cmp(&b.points)
                    .then(b.join_index.cmp(&a.join_index))
            });

        if let Some(winner) = winner {
            return Some(ContestOutcome::Winner(winner.id.clone()));
        }
        if !self.roster.iter().any(|p| p.alive) {
            return Some(ContestOutcome::AllEliminated);
        }
        if !self.roster.iter().any(Participant::is_required) {
            return Some(ContestOutcome::Abandoned);
        }
        None
    }

    fn finish_contest(&mut self, outcome: ContestOutcome) {
        self.set_phase(Phase::GameOver);
        self.timers.cancel_all();

        let standings = self.roster.standings();
        let winner = match &outcome {
            ContestOutcome::Winner(id) => standings.iter().find(|s| &s.player_id == id).cloned(),
            _ => None,
        };
        let duration_seconds = self
            .started_at
            .map_or(0, |started| (Utc::now() - started).num_seconds());

        info!(
            contest = %self.contest_id,
            outcome = outcome.as_str(),
            winner = ?winner.as_ref().map(|w| &w.username),
            rounds = self.round,
            "contest finished"
        );
        self.emitter.emit(Event::ContestFinished {
            timestamp: Utc::now(),
            contest_id: self.contest_id.clone(),
            winner: winner.as_ref().map(|w| w.player_id.clone()),
            rounds_played: self.round,
            standings: standings.clone(),
        });
        self.outbound.broadcast(&ServerMessage::GameOver {
            adversary_wins: winner.is_none(),
            winner,
            standings,
            rounds_played: self.round,
            duration_seconds,
        });
        self.outcome = Some(outcome);
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn eliminate(&mut self, id: &ParticipantId, location_index: usize, escape_option: Option<String>) {
        let round = self.round;
        let Some(participant) = self.roster.get_mut(id) else {
            return;
        };
        participant.alive = false;
        participant.round_history.push(RoundRecord {
            round,
            location_index,
            caught: true,
            escape_option,
            points_earned: 0,
        });
        let message = ServerMessage::PlayerEliminated {
            player_id: id.clone(),
            username: participant.name.clone(),
            final_score: participant.points,
        };
        info!(participant = %id, round, "participant eliminated");
        self.outbound.broadcast(&message);
    }

    fn notify_timeout(&self, id: &ParticipantId, phase: Phase) {
        if let Some(participant) = self.roster.get(id) {
            self.outbound.broadcast(&ServerMessage::PlayerTimeout {
                player_id: id.clone(),
                username: participant.name.clone(),
                phase,
            });
        }
    }

    fn broadcast_phase(&self) {
        self.outbound.broadcast(&ServerMessage::PhaseChange {
            phase: self.phase,
            round: self.round,
        });
    }

    fn broadcast_lobby(&self) {
        self.outbound.broadcast(&ServerMessage::LobbyState {
            contest_id: self.contest_id.clone(),
            players: self.lobby_players(),
            settings: LobbySettings {
                choice_timer_secs: secs(self.config.choice_timer),
                escape_timer_secs: secs(self.config.escape_timer),
                shop_timer_secs: secs(self.config.shop_timer),
                win_threshold: self.config.win_threshold,
                min_players: self.config.min_players,
                max_players: self.config.max_players,
            },
        });
    }

    fn lobby_players(&self) -> Vec<LobbyPlayer> {
        self.roster
            .iter()
            .map(|p| LobbyPlayer {
                player_id: p.id.clone(),
                username: p.name.clone(),
                ready: p.ready,
                connected: p.connected,
            })
            .collect()
    }

    fn game_state(&self) -> ServerMessage {
        ServerMessage::GameState {
            contest_id: self.contest_id.clone(),
            phase: self.phase,
            round: self.round,
            standings: self.roster.standings(),
        }
    }

    fn location_name(&self, index: usize) -> String {
        self.world
            .options()
            .get(index)
            .map_or_else(|| format!("location {index}"), |o| o.name.clone())
    }

    fn round_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("round".to_string(), self.round.into());
        payload
    }
}
