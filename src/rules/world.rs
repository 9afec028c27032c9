//! Configuration-driven scoring rules.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::config::WorldConfig;
use crate::contest::participant::Participant;
use crate::rules::{
    ActiveModifier, EscapeKind, EscapeOption, ItemEffect, LocationOption, Modifier, ShopItem,
    World,
};

/// [`World`] backed by a [`WorldConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredWorld {
    options: Vec<LocationOption>,
    escapes: Vec<Vec<EscapeOption>>,
    stake_variance: f64,
    modifier_chance: f64,
    max_modifiers: usize,
    pool: Vec<Modifier>,
    active: Vec<ActiveModifier>,
    shop: Vec<ShopItem>,
}

impl ConfiguredWorld {
    /// Builds the world from configuration.
    ///
    /// Escape options without a `keep_amount` get one here: 1.0 for hiding,
    /// the configured run retention for running.
    #[must_use]
    pub fn new(config: &WorldConfig) -> Self {
        let escapes = config
            .locations
            .iter()
            .map(|location| {
                location
                    .escape_options
                    .iter()
                    .cloned()
                    .map(|mut option| {
                        option.keep_amount.get_or_insert(match option.kind {
                            EscapeKind::Hide => 1.0,
                            EscapeKind::Run => config.run_point_retention,
                        });
                        option
                    })
                    .collect()
            })
            .collect();

        Self {
            options: config.locations.iter().map(|l| l.option()).collect(),
            escapes,
            stake_variance: config.stake_variance,
            modifier_chance: config.modifier_chance.clamp(0.0, 1.0),
            max_modifiers: config.max_modifiers,
            pool: config.modifiers.clone(),
            active: Vec::new(),
            shop: config.shop.clone(),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_points(value: f64) -> u32 {
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}

impl World for ConfiguredWorld {
    fn options(&self) -> &[LocationOption] {
        &self.options
    }

    fn escape_options(&self, location_index: usize) -> Vec<EscapeOption> {
        self.escapes.get(location_index).cloned().unwrap_or_default()
    }

    fn roll_stake(&self, location_index: usize, participant: &Participant, rng: &mut StdRng) -> u32 {
        let Some(option) = self.options.get(location_index) else {
            return 0;
        };

        let spread = if self.stake_variance > 0.0 {
            rng.random_range(-self.stake_variance..=self.stake_variance)
        } else {
            0.0
        };

        let modifiers: f64 = self
            .active
            .iter()
            .filter(|m| m.location_index == location_index)
            .map(|m| m.modifier.stake_multiplier)
            .product();

        let bonus: f64 = participant
            .owned_items
            .iter()
            .filter_map(|item| match item.effect {
                ItemEffect::StakeBonus(b) => Some(b),
                ItemEffect::EscapeRetention(_) => None,
            })
            .sum();

        to_points(f64::from(option.base_points) * (1.0 + spread) * modifiers * (1.0 + bonus))
    }

    fn advance_modifiers(&mut self, rng: &mut StdRng) {
        for modifier in &mut self.active {
            modifier.rounds_remaining = modifier.rounds_remaining.saturating_sub(1);
        }
        self.active.retain(|m| m.rounds_remaining > 0);

        if self.active.len() >= self.max_modifiers || self.pool.is_empty() {
            return;
        }
        if !rng.random_bool(self.modifier_chance) {
            return;
        }

        let free: Vec<usize> = (0..self.options.len())
            .filter(|i| !self.active.iter().any(|m| m.location_index == *i))
            .collect();
        let (Some(&location_index), Some(modifier)) = (free.choose(rng), self.pool.choose(rng))
        else {
            return;
        };

        debug!(
            modifier = %modifier.id,
            location = %self.options[location_index].name,
            rounds = modifier.duration_rounds,
            "modifier spawned"
        );
        self.active.push(ActiveModifier {
            modifier: modifier.clone(),
            location_index,
            rounds_remaining: modifier.duration_rounds,
        });
    }

    fn active_modifiers(&self) -> &[ActiveModifier] {
        &self.active
    }

    fn shop_items(&self) -> &[ShopItem] {
        &self.shop
    }
}
