//! Pending-state trackers for simultaneous decision sub-phases.
//!
//! [`PendingChoices`] collects one value per participant (location choices,
//! "done shopping" marks). [`PendingEscapes`] carries the richer context a
//! caught participant needs until their escape is answered.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::contest::participant::ParticipantId;
use crate::rules::EscapeOption;

// ============================================================================
// Choices
// ============================================================================

/// One optional value per participant. First write wins.
#[derive(Debug, Clone)]
pub struct PendingChoices<T> {
    values: HashMap<ParticipantId, T>,
}

impl<T> Default for PendingChoices<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<T> PendingChoices<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `id` unless a value is already present.
    ///
    /// Returns `false`, leaving the stored value untouched, on a duplicate.
    pub fn record(&mut self, id: &ParticipantId, value: T) -> bool {
        if self.values.contains_key(id) {
            return false;
        }
        self.values.insert(id.clone(), value);
        true
    }

    #[must_use]
    pub fn has(&self, id: &ParticipantId) -> bool {
        self.values.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&T> {
        self.values.get(id)
    }

    /// True iff every id in `required` has a value. Vacuously true for an
    /// empty set. Evaluated fresh on every call.
    #[must_use]
    pub fn all_submitted<'a>(&self, required: impl IntoIterator<Item = &'a ParticipantId>) -> bool {
        required.into_iter().all(|id| self.values.contains_key(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

// ============================================================================
// Escapes
// ============================================================================

/// What a caught participant stands to lose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeContext {
    pub location_index: usize,
    pub location_name: String,
    pub stake: u32,
}

/// A caught participant awaiting an escape decision.
#[derive(Debug, Clone)]
pub struct PendingEscape {
    pub participant: ParticipantId,
    pub stake: StakeContext,
    pub options: Vec<EscapeOption>,
    pub adversary_guess: String,
    pub adversary_reasoning: String,
    pub answered: bool,
    pub chosen: Option<String>,
}

impl PendingEscape {
    /// The option record for the participant's answer, if answered.
    #[must_use]
    pub fn chosen_option(&self) -> Option<&EscapeOption> {
        let chosen = self.chosen.as_deref()?;
        self.options.iter().find(|o| o.id == chosen)
    }
}

/// Escape entries for one round, in the order participants were caught.
#[derive(Debug, Clone, Default)]
pub struct PendingEscapes {
    entries: IndexMap<ParticipantId, PendingEscape>,
}

impl PendingEscapes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unanswered entry for `id`, replacing any previous one.
    pub fn add_pending(
        &mut self,
        id: ParticipantId,
        stake: StakeContext,
        options: Vec<EscapeOption>,
        adversary_guess: String,
        adversary_reasoning: String,
    ) {
        self.entries.insert(
            id.clone(),
            PendingEscape {
                participant: id,
                stake,
                options,
                adversary_guess,
                adversary_reasoning,
                answered: false,
                chosen: None,
            },
        );
    }

    /// Records the escape choice for `id`.
    ///
    /// Returns `false` when `id` has no entry, has already answered, or
    /// `option_id` is not one of the entry's options.
    pub fn record_choice(&mut self, id: &ParticipantId, option_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.answered || !entry.options.iter().any(|o| o.id == option_id) {
            return false;
        }
        entry.answered = true;
        entry.chosen = Some(option_id.to_string());
        true
    }

    /// True when every entry is answered. Vacuously true when empty.
    #[must_use]
    pub fn all_resolved(&self) -> bool {
        self.entries.values().all(|e| e.answered)
    }

    /// Ids still waiting for an answer, in caught order.
    #[must_use]
    pub fn unresolved_ids(&self) -> Vec<ParticipantId> {
        self.entries
            .values()
            .filter(|e| !e.answered)
            .map(|e| e.participant.clone())
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&PendingEscape> {
        self.entries.get(id)
    }

    /// Entries in caught order.
    pub fn entries(&self) -> impl Iterator<Item = &PendingEscape> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
