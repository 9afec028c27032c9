//! Participant records and the join-ordered registry.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::rules::ShopItem;

/// Opaque participant identity assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Creates an id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What happened to one participant in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    /// Round number (1-based).
    pub round: u32,
    /// Index of the location the participant chose.
    pub location_index: usize,
    /// Whether the adversary searched that location.
    pub caught: bool,
    /// Escape option chosen, when caught and offered one.
    pub escape_option: Option<String>,
    /// Points gained this round.
    pub points_earned: u32,
}

/// One human participant.
///
/// The history fields are written by the engine at resolution time and
/// read by the adversary collaborators.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Position in join order, starting at 0.
    pub join_index: usize,
    pub points: u32,
    pub alive: bool,
    pub connected: bool,
    pub ready: bool,
    pub owned_items: Vec<ShopItem>,
    pub choice_history: Vec<usize>,
    pub escape_history: Vec<String>,
    pub round_history: Vec<RoundRecord>,
}

impl Participant {
    /// Creates a fresh, connected, not-ready participant.
    #[must_use]
    pub fn new(id: ParticipantId, name: impl Into<String>, join_index: usize) -> Self {
        Self {
            id,
            name: name.into(),
            join_index,
            points: 0,
            alive: true,
            connected: true,
            ready: false,
            owned_items: Vec::new(),
            choice_history: Vec::new(),
            escape_history: Vec::new(),
            round_history: Vec::new(),
        }
    }

    /// Whether this participant must answer before a sub-phase can close.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.alive && self.connected
    }

    /// Whether the participant already owns the shop item `item_id`.
    #[must_use]
    pub fn owns(&self, item_id: &str) -> bool {
        self.owned_items.iter().any(|item| item.id == item_id)
    }
}

/// Public standing line used in round and game-over messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: ParticipantId,
    pub username: String,
    pub points: u32,
    pub alive: bool,
}

/// Participant registry preserving join order.
#[derive(Debug, Default)]
pub struct Roster {
    participants: IndexMap<ParticipantId, Participant>,
    joined: usize,
}

impl Roster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant with the next join index and returns it.
    pub fn add(&mut self, id: ParticipantId, name: impl Into<String>) -> &mut Participant {
        let participant = Participant::new(id.clone(), name, self.joined);
        self.joined += 1;
        self.participants.entry(id).or_insert(participant)
    }

    /// Removes a participant, keeping the others in join order.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.shift_remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Iterates participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Ids of connected participants, in join order.
    #[must_use]
    pub fn connected_ids(&self) -> Vec<ParticipantId> {
        self.iter()
            .filter(|p| p.connected)
            .map(|p| p.id.clone())
            .collect()
    }

    /// Ids of participants that are connected and alive, in join order.
    ///
    /// Recomputed on every call; a disconnect shrinks it immediately.
    #[must_use]
    pub fn required_ids(&self) -> Vec<ParticipantId> {
        self.iter()
            .filter(|p| p.is_required())
            .map(|p| p.id.clone())
            .collect()
    }

    /// True when at least one participant is connected and every connected
    /// participant is ready.
    #[must_use]
    pub fn all_connected_ready(&self) -> bool {
        let mut connected = self.iter().filter(|p| p.connected).peekable();
        connected.peek().is_some() && connected.all(|p| p.ready)
    }

    /// Standings sorted by points descending, eliminated participants last,
    /// join order breaking ties.
    #[must_use]
    pub fn standings(&self) -> Vec<Standing> {
        let mut ordered: Vec<&Participant> = self.iter().collect();
        ordered.sort_by(|a, b| {
            b.alive
                .cmp(&a.alive)
                .then(b.points.cmp(&a.points))
                .then(a.join_index.cmp(&b.join_index))
        });
        ordered
            .into_iter()
            .map(|p| Standing {
                player_id: p.id.clone(),
                username: p.name.clone(),
                points: p.points,
                alive: p.alive,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_of(names: &[&str]) -> Roster {
        let mut roster = Roster::new();
        for name in names {
            roster.add(ParticipantId::new(*name), *name);
        }
        roster
    }

    #[test]
    fn join_index_is_monotonic_across_removals() {
        let mut roster = roster_of(&["a", "b"]);
        roster.remove(&ParticipantId::new("a"));
        let c = roster.add(ParticipantId::new("c"), "c");
        assert_eq!(c.join_index, 2);
        let ids: Vec<_> = roster.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn required_ids_excludes_disconnected_and_dead() {
        let mut roster = roster_of(&["a", "b", "c"]);
        roster.get_mut(&ParticipantId::new("a")).unwrap().connected = false;
        roster.get_mut(&ParticipantId::new("b")).unwrap().alive = false;
        assert_eq!(roster.required_ids(), vec![ParticipantId::new("c")]);
    }

    #[test]
    fn all_connected_ready_ignores_disconnected() {
        let mut roster = roster_of(&["a", "b"]);
        assert!(!roster.all_connected_ready());
        roster.get_mut(&ParticipantId::new("a")).unwrap().ready = true;
        assert!(!roster.all_connected_ready());
        roster.get_mut(&ParticipantId::new("b")).unwrap().connected = false;
        assert!(roster.all_connected_ready());
    }

    #[test]
    fn all_connected_ready_is_false_for_empty_roster() {
        assert!(!Roster::new().all_connected_ready());
    }

    #[test]
    fn standings_order_points_then_alive() {
        let mut roster = roster_of(&["a", "b", "c"]);
        roster.get_mut(&ParticipantId::new("a")).unwrap().points = 10;
        roster.get_mut(&ParticipantId::new("b")).unwrap().points = 40;
        let c = roster.get_mut(&ParticipantId::new("c")).unwrap();
        c.points = 90;
        c.alive = false;

        let names: Vec<_> = roster.standings().into_iter().map(|s| s.username).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
