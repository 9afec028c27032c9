//! Contest phase and transition records.

use std::fmt;
use tokio::time::Instant;

use serde::{Deserialize, Serialize};

/// The phase a contest is in. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for participants to join and ready up.
    #[default]
    Lobby,
    /// Buying items between rounds (round 2 onwards).
    Shop,
    /// Participants secretly pick a location.
    Choosing,
    /// The adversary searches and stakes are paid out.
    Resolving,
    /// Caught participants pick an escape option.
    Escape,
    /// Scores are final for the round.
    RoundEnd,
    /// Terminal.
    GameOver,
}

impl Phase {
    /// Stable lowercase name, used in messages and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Shop => "shop",
            Self::Choosing => "choosing",
            Self::Resolving => "resolving",
            Self::Escape => "escape",
            Self::RoundEnd => "round_end",
            Self::GameOver => "game_over",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::GameOver)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a completed phase transition.
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub round: u32,
    pub at: Instant,
}
