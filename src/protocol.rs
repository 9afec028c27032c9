//! Wire messages.
//!
//! Both directions use `{"type": "TAG", "data": {...}}` objects, one per
//! line on the TCP transport. Client messages map one-to-one onto
//! [`GameEvent`]s; server messages are built by the engine.

use serde::{Deserialize, Serialize};

use crate::contest::event::{GameEvent, GameEventKind};
use crate::contest::participant::{ParticipantId, Standing};
use crate::contest::state::Phase;
use crate::rules::{EscapeOption, ShopItem};

// ============================================================================
// Client → server
// ============================================================================

/// A message sent by a participant's client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Join { username: String },
    Reconnect { player_id: ParticipantId },
    Ready,
    Unready,
    StartGame,
    LocationChoice { location_index: usize },
    EscapeChoice { option_id: String },
    ShopPurchase { item_id: String },
    SkipShop,
    Disconnect,
}

impl ClientMessage {
    /// Converts the message into an engine event on behalf of `participant`.
    ///
    /// `Reconnect` becomes a join for the reclaimed id; the transport
    /// rebinds the connection before delivering it.
    #[must_use]
    pub fn into_event(self, participant: &ParticipantId) -> GameEvent {
        let event = |kind| GameEvent::from_participant(kind, participant.clone());
        match self {
            Self::Join { username } => {
                event(GameEventKind::PlayerJoin).with_field("username", username)
            }
            Self::Reconnect { player_id } => {
                GameEvent::from_participant(GameEventKind::PlayerJoin, player_id)
            }
            Self::Ready => event(GameEventKind::PlayerReady),
            Self::Unready => event(GameEventKind::PlayerUnready),
            Self::StartGame => event(GameEventKind::GameStart),
            Self::LocationChoice { location_index } => event(GameEventKind::LocationChoice)
                .with_field("location_index", location_index),
            Self::EscapeChoice { option_id } => {
                event(GameEventKind::EscapeChoice).with_field("option_id", option_id)
            }
            Self::ShopPurchase { item_id } => {
                event(GameEventKind::ShopPurchase).with_field("item_id", item_id)
            }
            Self::SkipShop => event(GameEventKind::ShopSkip),
            Self::Disconnect => event(GameEventKind::PlayerLeave),
        }
    }
}

// ============================================================================
// Server → client
// ============================================================================

/// Lobby view of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub player_id: ParticipantId,
    pub username: String,
    pub ready: bool,
    pub connected: bool,
}

/// Contest settings shown in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub choice_timer_secs: u64,
    pub escape_timer_secs: u64,
    pub shop_timer_secs: u64,
    pub win_threshold: u32,
    pub min_players: usize,
    pub max_players: usize,
}

/// A location as shown at round start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub index: usize,
    pub name: String,
    pub emoji: String,
    pub base_points: u32,
}

/// An active modifier as shown at round start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierView {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub description: String,
    pub location_index: usize,
    pub rounds_remaining: u32,
}

/// One participant's line in a round result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRoundResult {
    pub player_id: ParticipantId,
    pub username: String,
    pub location: String,
    pub caught: bool,
    pub points_earned: u32,
    pub total_points: u32,
    pub predicted_location: Option<String>,
    pub confidence: Option<f64>,
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Welcome {
        player_id: ParticipantId,
        contest_id: String,
    },
    Error {
        code: String,
        message: String,
    },
    LobbyState {
        contest_id: String,
        players: Vec<LobbyPlayer>,
        settings: LobbySettings,
    },
    PlayerLeft {
        player_id: ParticipantId,
        username: String,
    },
    PlayerReady {
        player_id: ParticipantId,
        username: String,
        ready: bool,
    },
    GameState {
        contest_id: String,
        phase: Phase,
        round: u32,
        standings: Vec<Standing>,
    },
    GameStarted {
        contest_id: String,
        players: Vec<LobbyPlayer>,
        win_threshold: u32,
    },
    RoundStart {
        round: u32,
        timer_seconds: u64,
        server_timestamp: i64,
        locations: Vec<LocationView>,
        active_modifiers: Vec<ModifierView>,
        standings: Vec<Standing>,
        previous_search: Option<String>,
    },
    PhaseChange {
        phase: Phase,
        round: u32,
    },
    PlayerSubmitted {
        player_id: ParticipantId,
        username: String,
    },
    AllChoicesLocked {
        players_submitted: Vec<String>,
    },
    PlayerTimeout {
        player_id: ParticipantId,
        username: String,
        phase: Phase,
    },
    AdversaryAnalyzing {
        duration_ms: u64,
    },
    RoundResult {
        round: u32,
        searched: String,
        reasoning: String,
        results: Vec<PlayerRoundResult>,
        standings: Vec<Standing>,
    },
    PlayerCaught {
        player_id: ParticipantId,
        username: String,
        location: String,
        stake: u32,
    },
    EscapePhase {
        player_id: ParticipantId,
        location: String,
        stake: u32,
        options: Vec<EscapeOption>,
        timer_seconds: u64,
    },
    EscapeResult {
        player_id: ParticipantId,
        username: String,
        choice: String,
        guess: String,
        reasoning: String,
        escaped: bool,
        points_kept: u32,
        total_points: u32,
    },
    PlayerEliminated {
        player_id: ParticipantId,
        username: String,
        final_score: u32,
    },
    ShopState {
        player_id: ParticipantId,
        points: u32,
        items: Vec<ShopItem>,
        owned: Vec<String>,
        timer_seconds: u64,
    },
    PurchaseResult {
        player_id: ParticipantId,
        item_id: String,
        success: bool,
        points: u32,
        message: String,
    },
    GameOver {
        winner: Option<Standing>,
        adversary_wins: bool,
        standings: Vec<Standing>,
        rounds_played: u32,
        duration_seconds: i64,
    },
}

impl ServerMessage {
    /// Builds an `ERROR` message.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// The wire tag of this message.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "WELCOME",
            Self::Error { .. } => "ERROR",
            Self::LobbyState { .. } => "LOBBY_STATE",
            Self::PlayerLeft { .. } => "PLAYER_LEFT",
            Self::PlayerReady { .. } => "PLAYER_READY",
            Self::GameState { .. } => "GAME_STATE",
            Self::GameStarted { .. } => "GAME_STARTED",
            Self::RoundStart { .. } => "ROUND_START",
            Self::PhaseChange { .. } => "PHASE_CHANGE",
            Self::PlayerSubmitted { .. } => "PLAYER_SUBMITTED",
            Self::AllChoicesLocked { .. } => "ALL_CHOICES_LOCKED",
            Self::PlayerTimeout { .. } => "PLAYER_TIMEOUT",
            Self::AdversaryAnalyzing { .. } => "ADVERSARY_ANALYZING",
            Self::RoundResult { .. } => "ROUND_RESULT",
            Self::PlayerCaught { .. } => "PLAYER_CAUGHT",
            Self::EscapePhase { .. } => "ESCAPE_PHASE",
            Self::EscapeResult { .. } => "ESCAPE_RESULT",
            Self::PlayerEliminated { .. } => "PLAYER_ELIMINATED",
            Self::ShopState { .. } => "SHOP_STATE",
            Self::PurchaseResult { .. } => "PURCHASE_RESULT",
            Self::GameOver { .. } => "GAME_OVER",
        }
    }
}
