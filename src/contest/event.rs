//! Contest event taxonomy.
//!
//! Every input the engine reacts to is a [`GameEvent`]: a tag from the
//! closed [`GameEventKind`] set, an optional participant, and a small
//! payload. Transport messages and timer expiries both end up here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contest::participant::ParticipantId;

/// Named payload fields carried by an event.
pub type Payload = Map<String, Value>;

/// Closed set of event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    // participant lifecycle
    PlayerJoin,
    PlayerLeave,
    PlayerReady,
    PlayerUnready,

    // round lifecycle
    GameStart,
    RoundStart,
    RoundComplete,
    GameOver,

    // shop sub-phase
    ShopPurchase,
    ShopSkip,
    ShopTimeout,

    // location sub-phase
    LocationChoice,
    ChoiceTimeout,

    // escape sub-phase
    EscapeChoice,
    EscapeTimeout,
}

impl GameEventKind {
    /// Every tag, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::PlayerJoin,
        Self::PlayerLeave,
        Self::PlayerReady,
        Self::PlayerUnready,
        Self::GameStart,
        Self::RoundStart,
        Self::RoundComplete,
        Self::GameOver,
        Self::ShopPurchase,
        Self::ShopSkip,
        Self::ShopTimeout,
        Self::LocationChoice,
        Self::ChoiceTimeout,
        Self::EscapeChoice,
        Self::EscapeTimeout,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlayerJoin => "player_join",
            Self::PlayerLeave => "player_leave",
            Self::PlayerReady => "player_ready",
            Self::PlayerUnready => "player_unready",
            Self::GameStart => "game_start",
            Self::RoundStart => "round_start",
            Self::RoundComplete => "round_complete",
            Self::GameOver => "game_over",
            Self::ShopPurchase => "shop_purchase",
            Self::ShopSkip => "shop_skip",
            Self::ShopTimeout => "shop_timeout",
            Self::LocationChoice => "location_choice",
            Self::ChoiceTimeout => "choice_timeout",
            Self::EscapeChoice => "escape_choice",
            Self::EscapeTimeout => "escape_timeout",
        }
    }
}

impl fmt::Display for GameEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the timer instance that synthesized an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStamp {
    pub name: String,
    pub generation: u64,
}

/// One input to the contest engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    pub kind: GameEventKind,
    pub participant: Option<ParticipantId>,
    pub payload: Payload,
    /// Set only on timer-synthesized events.
    pub timer: Option<TimerStamp>,
}

impl GameEvent {
    /// Creates an event with no participant and an empty payload.
    #[must_use]
    pub fn new(kind: GameEventKind) -> Self {
        Self {
            kind,
            participant: None,
            payload: Payload::new(),
            timer: None,
        }
    }

    /// Creates an event on behalf of `participant`.
    #[must_use]
    pub fn from_participant(kind: GameEventKind, participant: ParticipantId) -> Self {
        Self {
            participant: Some(participant),
            ..Self::new(kind)
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Reads a non-negative integer payload field.
    #[must_use]
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.payload
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Reads a string payload field.
    #[must_use]
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
