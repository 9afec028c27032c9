//! Shared harness for contest integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::mpsc;

use lootrun::config::{GameConfig, LocationConfig};
use lootrun::contest::engine::{ContestEngine, EngineOptions};
use lootrun::contest::event::{GameEvent, GameEventKind};
use lootrun::contest::participant::{Participant, ParticipantId};
use lootrun::protocol::ServerMessage;
use lootrun::rules::{
    Adversary, ConfiguredWorld, EscapeAdversary, EscapeGuess, EscapeKind, EscapeOption,
    EscapeOutcome, HiddenChoice, ItemEffect, LocationOption, PatternEscapeAdversary, SearchDecision,
    ShopItem,
};
use lootrun::transport::Outbound;

pub const ALLEY: usize = 0;
pub const BANK: usize = 1;
pub const DEAD_END: usize = 2;

// ============================================================================
// Recording outbound
// ============================================================================

/// One message the engine sent. `to` is `None` for broadcasts.
#[derive(Debug, Clone)]
pub struct Sent {
    pub to: Option<ParticipantId>,
    pub message: ServerMessage,
}

/// [`Outbound`] that records everything.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingOutbound {
    pub fn all(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn tags(&self) -> Vec<&'static str> {
        self.all().iter().map(|s| s.message.tag()).collect()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.all().iter().filter(|s| s.message.tag() == tag).count()
    }

    /// Messages of `tag`, broadcast or direct.
    pub fn with_tag(&self, tag: &str) -> Vec<Sent> {
        self.all()
            .into_iter()
            .filter(|s| s.message.tag() == tag)
            .collect()
    }

    /// Messages sent directly to `id`.
    pub fn direct(&self, id: &str) -> Vec<ServerMessage> {
        self.all()
            .into_iter()
            .filter(|s| s.to.as_ref().is_some_and(|to| to.as_str() == id))
            .map(|s| s.message)
            .collect()
    }
}

impl Outbound for RecordingOutbound {
    fn broadcast(&self, message: &ServerMessage) {
        self.sent.lock().unwrap().push(Sent {
            to: None,
            message: message.clone(),
        });
    }

    fn send_to(&self, participant: &ParticipantId, message: &ServerMessage) {
        self.sent.lock().unwrap().push(Sent {
            to: Some(participant.clone()),
            message: message.clone(),
        });
    }
}

// ============================================================================
// Scripted adversaries
// ============================================================================

/// Searches scripted locations in order, then `fallback` forever.
#[derive(Debug)]
pub struct ScriptedAdversary {
    pub searches: VecDeque<usize>,
    pub fallback: usize,
}

impl ScriptedAdversary {
    pub fn new(searches: &[usize], fallback: usize) -> Self {
        Self {
            searches: searches.iter().copied().collect(),
            fallback,
        }
    }
}

impl Adversary for ScriptedAdversary {
    fn decide(
        &mut self,
        _options: &[LocationOption],
        _choices: &[HiddenChoice<'_>],
        _rng: &mut StdRng,
    ) -> SearchDecision {
        let searched = self.searches.pop_front().unwrap_or(self.fallback);
        SearchDecision {
            searched,
            predictions: Vec::new(),
            reasoning: format!("scripted search of {searched}"),
        }
    }
}

/// Always guesses `guess`; resolution follows the default rules.
#[derive(Debug)]
pub struct ScriptedEscapeAdversary {
    pub guess: String,
}

impl EscapeAdversary for ScriptedEscapeAdversary {
    fn predict(
        &mut self,
        _participant: &Participant,
        _options: &[EscapeOption],
        _rng: &mut StdRng,
    ) -> EscapeGuess {
        EscapeGuess {
            option_id: self.guess.clone(),
            reasoning: "scripted".to_string(),
        }
    }

    fn resolve(
        &self,
        chosen: &EscapeOption,
        guess: &EscapeGuess,
        stake: u32,
        participant: &Participant,
    ) -> EscapeOutcome {
        PatternEscapeAdversary.resolve(chosen, guess, stake, participant)
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn escape(id: &str, kind: EscapeKind) -> EscapeOption {
    EscapeOption {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        description: String::new(),
        keep_amount: None,
    }
}

fn location(name: &str, base_points: u32, escapes: Vec<EscapeOption>) -> LocationConfig {
    LocationConfig {
        name: name.to_string(),
        emoji: String::new(),
        base_points,
        escape_options: escapes,
    }
}

/// Small deterministic world: fixed stakes, no modifiers, no resolve pause.
///
/// | index | location | stake | escapes |
/// |-------|----------|-------|---------|
/// | 0 | Alley | 10 | hide, run |
/// | 1 | Bank | 30 | hide, run |
/// | 2 | Dead End | 20 | none |
pub fn test_config() -> GameConfig {
    let mut config = GameConfig::default();
    config.contest.seed = Some(42);
    config.contest.resolve_pause = Duration::ZERO;
    config.contest.shop_timer = Duration::from_secs(5);
    config.contest.choice_timer = Duration::from_secs(10);
    config.contest.escape_timer = Duration::from_secs(5);
    config.contest.win_threshold = 50;
    config.contest.min_players = 2;

    config.world.locations = vec![
        location(
            "Alley",
            10,
            vec![escape("hide", EscapeKind::Hide), escape("run", EscapeKind::Run)],
        ),
        location(
            "Bank",
            30,
            vec![escape("hide", EscapeKind::Hide), escape("run", EscapeKind::Run)],
        ),
        location("Dead End", 20, Vec::new()),
    ];
    config.world.stake_variance = 0.0;
    config.world.run_point_retention = 0.5;
    config.world.modifier_chance = 0.0;
    config.world.shop = vec![ShopItem {
        id: "lucky_charm".to_string(),
        name: "Lucky Charm".to_string(),
        description: String::new(),
        cost: 5,
        effect: ItemEffect::StakeBonus(0.5),
    }];
    config
}

// ============================================================================
// Harness
// ============================================================================

/// Engine options over `config` with scripted adversaries: searches
/// `searches` in order (then the dead end), always guesses `"hide"`.
pub fn scripted_options(
    config: &GameConfig,
    searches: &[usize],
    out: Arc<RecordingOutbound>,
) -> EngineOptions {
    let outbound: Arc<dyn Outbound> = out;
    EngineOptions {
        contest_id: "test".to_string(),
        contest: config.contest.clone(),
        world: Box::new(ConfiguredWorld::new(&config.world)),
        adversary: Box::new(ScriptedAdversary::new(searches, DEAD_END)),
        escape_adversary: Box::new(ScriptedEscapeAdversary {
            guess: "hide".to_string(),
        }),
        outbound,
        emitter: Arc::new(lootrun::observability::EventEmitter::noop()),
    }
}

/// An engine wired to a recording outbound and its own timer channel.
pub struct Harness {
    pub engine: ContestEngine,
    pub timers: mpsc::UnboundedReceiver<GameEvent>,
    pub out: Arc<RecordingOutbound>,
}

impl Harness {
    /// Engine over `config` using [`scripted_options`].
    pub fn new(config: &GameConfig, searches: &[usize]) -> Self {
        let out = Arc::new(RecordingOutbound::default());
        let options = scripted_options(config, searches, out.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine: ContestEngine::new(options, tx),
            timers: rx,
            out,
        }
    }

    pub fn with_searches(searches: &[usize]) -> Self {
        Self::new(&test_config(), searches)
    }

    pub async fn send(&mut self, event: GameEvent) {
        self.engine.deliver(event).await;
    }

    pub async fn join(&mut self, id: &str) {
        self.send(
            GameEvent::from_participant(GameEventKind::PlayerJoin, id.into())
                .with_field("username", id),
        )
        .await;
    }

    pub async fn ready(&mut self, id: &str) {
        self.send(GameEvent::from_participant(GameEventKind::PlayerReady, id.into()))
            .await;
    }

    pub async fn leave(&mut self, id: &str) {
        self.send(GameEvent::from_participant(GameEventKind::PlayerLeave, id.into()))
            .await;
    }

    pub async fn choose(&mut self, id: &str, location_index: usize) {
        self.send(
            GameEvent::from_participant(GameEventKind::LocationChoice, id.into())
                .with_field("location_index", location_index),
        )
        .await;
    }

    pub async fn escape(&mut self, id: &str, option_id: &str) {
        self.send(
            GameEvent::from_participant(GameEventKind::EscapeChoice, id.into())
                .with_field("option_id", option_id),
        )
        .await;
    }

    pub async fn skip_shop(&mut self, id: &str) {
        self.send(GameEvent::from_participant(GameEventKind::ShopSkip, id.into()))
            .await;
    }

    pub async fn buy(&mut self, id: &str, item_id: &str) {
        self.send(
            GameEvent::from_participant(GameEventKind::ShopPurchase, id.into())
                .with_field("item_id", item_id),
        )
        .await;
    }

    /// Joins and readies every id; with two or more this starts round 1.
    pub async fn start(&mut self, ids: &[&str]) {
        for id in ids {
            self.join(id).await;
        }
        for id in ids {
            self.ready(id).await;
        }
    }

    /// Waits for the next timer expiry without delivering it.
    pub async fn next_timer(&mut self) -> GameEvent {
        self.timers.recv().await.expect("timer channel closed")
    }

    /// Waits for the next timer expiry and delivers it.
    pub async fn fire_next_timer(&mut self) -> GameEventKind {
        let event = self.next_timer().await;
        let kind = event.kind;
        self.send(event).await;
        kind
    }

    pub fn points(&self, id: &str) -> u32 {
        self.engine.participant(&id.into()).expect("known participant").points
    }

    pub fn alive(&self, id: &str) -> bool {
        self.engine.participant(&id.into()).expect("known participant").alive
    }
}
