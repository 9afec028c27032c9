//! Configuration schema types
//!
//! Deserialized from YAML. Every field has a default, so an empty document
//! describes a playable contest on the built-in eight-location map.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::{EscapeKind, EscapeOption, ItemEffect, LocationOption, Modifier, ShopItem};

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for a `lootrun` server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameConfig {
    /// Contest pacing and participant limits.
    pub contest: ContestConfig,

    /// Map, modifiers and shop.
    pub world: WorldConfig,
}

// ============================================================================
// Contest
// ============================================================================

/// Pacing and participant limits for one contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContestConfig {
    /// How long the shop stays open (rounds 2+).
    #[serde(with = "duration_str")]
    pub shop_timer: Duration,

    /// How long participants have to pick a location.
    #[serde(with = "duration_str")]
    pub choice_timer: Duration,

    /// How long a caught participant has to pick an escape option.
    #[serde(with = "duration_str")]
    pub escape_timer: Duration,

    /// Cosmetic pause while the adversary "analyzes" before the result.
    #[serde(with = "duration_str")]
    pub resolve_pause: Duration,

    /// Score an alive participant must reach to win.
    pub win_threshold: u32,

    /// Connected participants needed before the contest can start.
    pub min_players: usize,

    /// Lobby capacity.
    pub max_players: usize,

    /// Start as soon as every connected participant is ready.
    pub auto_start: bool,

    /// Seed for the contest RNG; drawn from the OS when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            shop_timer: Duration::from_secs(20),
            choice_timer: Duration::from_secs(30),
            escape_timer: Duration::from_secs(15),
            resolve_pause: Duration::from_secs(2),
            win_threshold: 100,
            min_players: 2,
            max_players: 6,
            auto_start: true,
            seed: None,
        }
    }
}

// ============================================================================
// World
// ============================================================================

/// A location together with the escape options offered there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    pub base_points: u32,
    #[serde(default)]
    pub escape_options: Vec<EscapeOption>,
}

impl LocationConfig {
    /// The player-visible part of this location.
    #[must_use]
    pub fn option(&self) -> LocationOption {
        LocationOption {
            name: self.name.clone(),
            emoji: self.emoji.clone(),
            base_points: self.base_points,
        }
    }
}

/// Map, modifiers and shop catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Locations in display order. Indices are stable for the whole contest.
    pub locations: Vec<LocationConfig>,

    /// Relative spread of rolled stakes around the base points (0.2 = ±20%).
    pub stake_variance: f64,

    /// Share of the stake kept after a successful `run` escape without an
    /// explicit `keep_amount`.
    pub run_point_retention: f64,

    /// Chance per round that a new modifier spawns.
    pub modifier_chance: f64,

    /// Maximum modifiers active at once.
    pub max_modifiers: usize,

    /// Modifier pool to spawn from.
    pub modifiers: Vec<Modifier>,

    /// Shop catalog.
    pub shop: Vec<ShopItem>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            locations: default_locations(),
            stake_variance: 0.2,
            run_point_retention: 0.8,
            modifier_chance: 0.3,
            max_modifiers: 2,
            modifiers: default_modifiers(),
            shop: default_shop(),
        }
    }
}

fn escape(id: &str, name: &str, kind: EscapeKind, description: &str) -> EscapeOption {
    EscapeOption {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        description: description.to_string(),
        keep_amount: None,
    }
}

fn location(name: &str, emoji: &str, base_points: u32, escapes: Vec<EscapeOption>) -> LocationConfig {
    LocationConfig {
        name: name.to_string(),
        emoji: emoji.to_string(),
        base_points,
        escape_options: escapes,
    }
}

fn default_locations() -> Vec<LocationConfig> {
    use EscapeKind::{Hide, Run};
    vec![
        location("Gas Station", "⛽", 5, vec![
            escape("hide_restroom", "Restroom", Hide, "Lock yourself in the restroom"),
            escape("run_highway", "Highway", Run, "Sprint along the highway shoulder"),
        ]),
        location("Pharmacy", "💊", 10, vec![
            escape("hide_storage", "Storage Room", Hide, "Duck behind the stock shelves"),
            escape("run_back_door", "Back Door", Run, "Out through the loading door"),
        ]),
        location("Jewelry Store", "💎", 20, vec![
            escape("hide_vault", "Display Vault", Hide, "Squeeze into the display vault"),
            escape("run_mall", "Mall Crowd", Run, "Blend into the mall crowd"),
            escape("run_roof", "Roof Access", Run, "Climb to the roof"),
        ]),
        location("Bank Vault", "🏦", 35, vec![
            escape("hide_deposit_boxes", "Deposit Boxes", Hide, "Hide among the deposit boxes"),
            escape("run_sewer", "Sewer Tunnel", Run, "Drop into the sewer tunnel"),
            escape("run_getaway", "Getaway Car", Run, "Make for the getaway car"),
        ]),
        location("Warehouse", "🏭", 8, vec![
            escape("hide_crates", "Crates", Hide, "Hide between stacked crates"),
            escape("run_loading_dock", "Loading Dock", Run, "Jump off the loading dock"),
        ]),
        location("Pawn Shop", "🏪", 12, vec![
            escape("hide_counter", "Under the Counter", Hide, "Crouch under the counter"),
            escape("run_alley", "Back Alley", Run, "Slip out into the alley"),
        ]),
        location("Electronics Store", "📺", 15, vec![
            escape("hide_tv_wall", "TV Wall", Hide, "Stand still behind the TV wall"),
            escape("run_parking", "Parking Lot", Run, "Weave through the parking lot"),
        ]),
        location("Convenience Store", "🏬", 7, vec![
            escape("hide_freezer", "Walk-in Freezer", Hide, "Wait it out in the freezer"),
            escape("run_street", "Side Street", Run, "Run down the side street"),
        ]),
    ]
}

fn default_modifiers() -> Vec<Modifier> {
    vec![
        Modifier {
            id: "police_patrol".to_string(),
            name: "Police Patrol".to_string(),
            emoji: "🚓".to_string(),
            description: "Stakes halved while the patrol is around".to_string(),
            stake_multiplier: 0.5,
            duration_rounds: 2,
        },
        Modifier {
            id: "jackpot".to_string(),
            name: "Jackpot".to_string(),
            emoji: "💰".to_string(),
            description: "Fresh delivery, stakes doubled".to_string(),
            stake_multiplier: 2.0,
            duration_rounds: 1,
        },
        Modifier {
            id: "blackout".to_string(),
            name: "Blackout".to_string(),
            emoji: "🔦".to_string(),
            description: "Alarms are down, stakes up by half".to_string(),
            stake_multiplier: 1.5,
            duration_rounds: 2,
        },
    ]
}

fn default_shop() -> Vec<ShopItem> {
    vec![
        ShopItem {
            id: "high_roller".to_string(),
            name: "High Roller".to_string(),
            description: "+20% to every stake".to_string(),
            cost: 30,
            effect: ItemEffect::StakeBonus(0.2),
        },
        ShopItem {
            id: "escape_artist".to_string(),
            name: "Escape Artist".to_string(),
            description: "Keep 15% more after a successful escape".to_string(),
            cost: 25,
            effect: ItemEffect::EscapeRetention(0.15),
        },
        ShopItem {
            id: "inside_knowledge".to_string(),
            name: "Inside Knowledge".to_string(),
            description: "+10% to every stake".to_string(),
            cost: 15,
            effect: ItemEffect::StakeBonus(0.1),
        },
    ]
}

// ============================================================================
// Duration strings
// ============================================================================

/// Serializes durations as humantime strings such as `30s` or `500ms`.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid duration '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: GameConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, GameConfig::default());
        assert_eq!(config.world.locations.len(), 8);
        assert_eq!(config.contest.choice_timer, Duration::from_secs(30));
    }

    #[test]
    fn durations_parse_humantime() {
        let yaml = "contest:\n  choice_timer: 1m 30s\n  escape_timer: 500ms\n";
        let config: GameConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.contest.choice_timer, Duration::from_secs(90));
        assert_eq!(config.contest.escape_timer, Duration::from_millis(500));
        assert_eq!(config.contest.shop_timer, Duration::from_secs(20));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = serde_yaml::from_str::<GameConfig>("contest:\n  shop_timer: soon\n").unwrap_err();
        assert!(err.to_string().contains("invalid duration 'soon'"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<GameConfig>("contest:\n  turbo: true\n").is_err());
    }

    #[test]
    fn item_effects_deserialize_externally_tagged() {
        let yaml = "id: lucky\nname: Lucky Coin\ncost: 5\neffect:\n  stake_bonus: 0.05\n";
        let item: ShopItem = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(item.effect, ItemEffect::StakeBonus(0.05));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let config = GameConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        let back: GameConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
