//! Contest orchestration: events, timers, pending trackers and the phase
//! state machine that ties them together.

pub mod engine;
pub mod event;
pub mod participant;
pub mod pending;
pub mod state;
pub mod timers;

pub use engine::{ContestEngine, ContestOutcome, ContestSummary, EngineOptions};
pub use event::{GameEvent, GameEventKind, Payload, TimerStamp};
pub use participant::{Participant, ParticipantId, Roster, Standing};
pub use pending::{PendingChoices, PendingEscape, PendingEscapes, StakeContext};
pub use state::{Phase, PhaseTransition};
pub use timers::TimerManager;
