//! Configuration validation
//!
//! Runs on the fully deserialized `GameConfig`. Collects every issue
//! instead of stopping at the first one.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{ContestConfig, GameConfig, WorldConfig};
use crate::error::{Severity, ValidationIssue};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &GameConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_contest(&config.contest);
        self.validate_world(&config.world, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Contest
    // ========================================================================

    fn validate_contest(&mut self, contest: &ContestConfig) {
        for (field, value) in [
            ("contest.shop_timer", contest.shop_timer),
            ("contest.choice_timer", contest.choice_timer),
            ("contest.escape_timer", contest.escape_timer),
        ] {
            if value.is_zero() {
                self.add_error(field, "timer must be greater than zero");
            }
        }

        if contest.resolve_pause > Duration::from_secs(30) {
            self.add_warning(
                "contest.resolve_pause",
                "resolve pause longer than 30s stalls every round",
            );
        }

        if contest.win_threshold == 0 {
            self.add_error("contest.win_threshold", "must be greater than zero");
        }

        if contest.min_players == 0 {
            self.add_error("contest.min_players", "must be at least 1");
        }

        if contest.max_players < contest.min_players {
            self.add_error("contest.max_players", "must be at least min_players");
        }

        if !contest.auto_start {
            self.add_warning(
                "contest.auto_start",
                "auto start disabled; a participant must send START_GAME",
            );
        }
    }

    // ========================================================================
    // World
    // ========================================================================

    fn validate_world(&mut self, world: &WorldConfig, limits: &ConfigLimits) {
        if world.locations.is_empty() {
            self.add_error("world.locations", "at least one location is required");
        }

        if world.locations.len() > limits.max_locations {
            self.add_error(
                "world.locations",
                &format!("more than {} locations", limits.max_locations),
            );
        }

        let mut names = HashSet::new();
        for (i, location) in world.locations.iter().enumerate() {
            let path = format!("world.locations[{i}]");

            if location.name.trim().is_empty() {
                self.add_error(&format!("{path}.name"), "location name cannot be empty");
            } else if !names.insert(location.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("duplicate location name '{}'", location.name),
                );
            }

            if location.escape_options.is_empty() {
                self.add_warning(
                    &format!("{path}.escape_options"),
                    "no escape options; participants caught here are eliminated",
                );
            }

            let mut ids = HashSet::new();
            for (j, option) in location.escape_options.iter().enumerate() {
                let option_path = format!("{path}.escape_options[{j}]");
                if !ids.insert(option.id.as_str()) {
                    self.add_error(
                        &format!("{option_path}.id"),
                        &format!("duplicate escape option id '{}'", option.id),
                    );
                }
                if let Some(keep) = option.keep_amount {
                    self.check_fraction(&format!("{option_path}.keep_amount"), keep);
                }
            }
        }

        self.check_fraction("world.stake_variance", world.stake_variance);
        self.check_fraction("world.run_point_retention", world.run_point_retention);
        self.check_fraction("world.modifier_chance", world.modifier_chance);

        let mut modifier_ids = HashSet::new();
        for (i, modifier) in world.modifiers.iter().enumerate() {
            let path = format!("world.modifiers[{i}]");
            if !modifier_ids.insert(modifier.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("duplicate modifier id '{}'", modifier.id),
                );
            }
            if !modifier.stake_multiplier.is_finite() || modifier.stake_multiplier < 0.0 {
                self.add_error(
                    &format!("{path}.stake_multiplier"),
                    "must be a non-negative number",
                );
            }
            if modifier.duration_rounds == 0 {
                self.add_error(&format!("{path}.duration_rounds"), "must be at least 1");
            }
        }

        let mut item_ids = HashSet::new();
        for (i, item) in world.shop.iter().enumerate() {
            if !item_ids.insert(item.id.as_str()) {
                self.add_error(
                    &format!("world.shop[{i}].id"),
                    &format!("duplicate shop item id '{}'", item.id),
                );
            }
        }
    }

    fn check_fraction(&mut self, path: &str, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.add_error(path, "must be between 0.0 and 1.0");
        }
    }

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
