//! Contest configuration: schema, loading and validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning};
pub use schema::{ContestConfig, GameConfig, LocationConfig, WorldConfig};
pub use validation::{ValidationResult, Validator};

/// Parses an environment variable, falling back to `default` when it is
/// unset or does not parse.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_when_unset() {
        let value: usize = env_or("LOOTRUN_TEST_UNSET_VAR_93127", 42);
        assert_eq!(value, 42);
    }
}
