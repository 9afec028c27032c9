//! Collaborators consumed by the contest engine.
//!
//! The engine only orchestrates. What a location is worth, where the
//! adversary searches and how an escape plays out are decided behind the
//! [`World`], [`Adversary`] and [`EscapeAdversary`] traits. Default
//! implementations driven by configuration live in [`world`] and
//! [`adversary`].

pub mod adversary;
pub mod world;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::contest::participant::{Participant, ParticipantId};

pub use adversary::{PatternEscapeAdversary, PopularityAdversary};
pub use world::ConfiguredWorld;

// ============================================================================
// Shared data
// ============================================================================

/// A location participants can choose to loot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationOption {
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    pub base_points: u32,
}

/// How an escape option behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeKind {
    /// Keeps the whole stake on success.
    Hide,
    /// Keeps part of the stake on success.
    Run,
}

/// One way out for a caught participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscapeOption {
    pub id: String,
    pub name: String,
    pub kind: EscapeKind,
    #[serde(default)]
    pub description: String,
    /// Share of the stake kept on success. Falls back to the world's
    /// default run retention for `run` options and to 1.0 for `hide`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_amount: Option<f64>,
}

/// A transient modifier attached to one location for a few rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub description: String,
    /// Applied to the rolled stake at the affected location.
    pub stake_multiplier: f64,
    /// Rounds the modifier stays active once spawned.
    pub duration_rounds: u32,
}

/// A modifier currently affecting a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveModifier {
    pub modifier: Modifier,
    pub location_index: usize,
    pub rounds_remaining: u32,
}

/// Effect granted by a purchased shop item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemEffect {
    /// Adds this fraction to every rolled stake.
    StakeBonus(f64),
    /// Adds this fraction to the retention of a successful escape.
    EscapeRetention(f64),
}

/// Something a participant can buy between rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cost: u32,
    pub effect: ItemEffect,
}

// ============================================================================
// Adversary inputs and outputs
// ============================================================================

/// A participant's hidden location choice, as seen by the adversary.
#[derive(Debug, Clone, Copy)]
pub struct HiddenChoice<'a> {
    pub participant: &'a Participant,
    pub location_index: usize,
}

/// The adversary's guess about one participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub participant: ParticipantId,
    pub location_index: usize,
    pub confidence: f64,
    pub reasoning: String,
}

/// Which location the adversary searches this round.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDecision {
    pub searched: usize,
    pub predictions: Vec<Prediction>,
    pub reasoning: String,
}

/// Predicted escape option for one caught participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeGuess {
    pub option_id: String,
    pub reasoning: String,
}

/// Result of one escape attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeOutcome {
    pub escaped: bool,
    /// Points of the stake kept. Zero when caught.
    pub retained: u32,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Scoring rules: locations, stakes, modifiers and the shop catalog.
pub trait World: Send {
    /// Choosable locations, indexed by location index.
    fn options(&self) -> &[LocationOption];

    /// Escape options for a participant caught at `location_index`.
    ///
    /// An empty list means the participant is eliminated without an
    /// escape attempt.
    fn escape_options(&self, location_index: usize) -> Vec<EscapeOption>;

    /// Rolls the stake a participant earns at `location_index` this round.
    fn roll_stake(&self, location_index: usize, participant: &Participant, rng: &mut StdRng)
    -> u32;

    /// Ages active modifiers and possibly spawns new ones. Called once at
    /// the start of every round.
    fn advance_modifiers(&mut self, rng: &mut StdRng);

    /// Modifiers in effect for the current round.
    fn active_modifiers(&self) -> &[ActiveModifier];

    /// Items available in the shop sub-phase.
    fn shop_items(&self) -> &[ShopItem];
}

/// Chooses which location to search each round.
pub trait Adversary: Send {
    /// Called once per round during resolution, with every hidden choice.
    fn decide(
        &mut self,
        options: &[LocationOption],
        choices: &[HiddenChoice<'_>],
        rng: &mut StdRng,
    ) -> SearchDecision;
}

/// Predicts and resolves escape attempts of caught participants.
pub trait EscapeAdversary: Send {
    /// Predicts which option `participant` will pick. Called once when the
    /// participant is caught, before they answer.
    fn predict(
        &mut self,
        participant: &Participant,
        options: &[EscapeOption],
        rng: &mut StdRng,
    ) -> EscapeGuess;

    /// Decides the outcome of the participant's actual choice.
    fn resolve(
        &self,
        chosen: &EscapeOption,
        guess: &EscapeGuess,
        stake: u32,
        participant: &Participant,
    ) -> EscapeOutcome;
}
