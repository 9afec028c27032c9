//! Configuration loader
//!
//! Pipeline:
//! 1. Size check and UTF-8 BOM strip
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing and typed deserialization
//! 4. Validation (errors abort, warnings are returned)
//! 5. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use crate::config::env_or;
use crate::config::schema::GameConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits applied while loading.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,

    /// Maximum number of locations on the map.
    pub max_locations: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_size: env_or("LOOTRUN_MAX_CONFIG_SIZE", 1024 * 1024),
            max_locations: env_or("LOOTRUN_MAX_LOCATIONS", 64),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<GameConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({location})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Loads contest configuration files.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    limits: ConfigLimits,
}

impl ConfigLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, if a required
    /// environment variable is unset, if YAML parsing fails, or if
    /// validation reports errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.limits.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.limits.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw, path, |name| std::env::var(name).ok())
    }

    /// Loads configuration from text already in memory.
    ///
    /// `lookup` resolves environment variables; `source` is only used in
    /// error messages.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus the file checks.
    pub fn load_str(
        &self,
        raw: &str,
        source: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut warnings = Vec::new();
        let expanded = expand_env(raw, source, &lookup, &mut warnings)?;

        let config = if expanded.trim().is_empty() {
            GameConfig::default()
        } else {
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        let result = Validator::new().validate(&config, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors: result.errors,
            });
        }

        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expands `${VAR}`, `${VAR:-default}`, `${VAR:?message}` and `$$`.
///
/// An unset `${VAR}` without a default expands to the empty string and
/// records a warning. An unset `${VAR:?message}` is an error.
fn expand_env(
    raw: &str,
    source: &Path,
    lookup: &impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<LoadWarning>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let close = body.find('}').ok_or_else(|| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: Some(raw[..raw.len() - rest.len() + dollar].lines().count().max(1)),
                message: "unclosed environment variable reference".to_string(),
            })?;
            out.push_str(&resolve_reference(&body[..close], source, lookup, warnings)?);
            rest = &body[close + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_reference(
    reference: &str,
    source: &Path,
    lookup: &impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<LoadWarning>,
) -> Result<String, ConfigError> {
    if let Some((name, default)) = reference.split_once(":-") {
        return Ok(lookup(name).unwrap_or_else(|| default.to_string()));
    }

    if let Some((name, message)) = reference.split_once(":?") {
        return lookup(name).ok_or_else(|| ConfigError::EnvVarNotSet {
            var: name.to_string(),
            location: source.display().to_string(),
            message: if message.is_empty() {
                "required".to_string()
            } else {
                message.to_string()
            },
        });
    }

    Ok(lookup(reference).unwrap_or_else(|| {
        warnings.push(LoadWarning {
            message: format!("environment variable '{reference}' is not set, using empty string"),
            location: Some(source.display().to_string()),
        });
        String::new()
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn inline_source() -> PathBuf {
        PathBuf::from("<inline>")
    }
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn expand(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> (String, Vec<LoadWarning>) {
        let mut warnings = Vec::new();
        let out = expand_env(raw, Path::new("test.yaml"), &lookup, &mut warnings).unwrap();
        (out, warnings)
    }

    #[test]
    fn test_env_substitution_simple() {
        let (out, warnings) = expand("seed: ${SEED}", env(&[("SEED", "42")]));
        assert_eq!(out, "seed: 42");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_env_substitution_default() {
        let (out, _) = expand("choice_timer: ${TURN:-45s}", env(&[]));
        assert_eq!(out, "choice_timer: 45s");
    }

    #[test]
    fn test_env_substitution_required_missing() {
        let mut warnings = Vec::new();
        let result = expand_env(
            "seed: ${SEED:?seed is required}",
            Path::new("test.yaml"),
            &env(&[]),
            &mut warnings,
        );
        let err = result.unwrap_err();
        assert!(
            matches!(&err, ConfigError::EnvVarNotSet { var, location, message }
                if var == "SEED" && location == "test.yaml" && message == "seed is required"),
            "{err:?}"
        );
        assert_eq!(
            err.to_string(),
            "environment variable 'SEED' not set (referenced at test.yaml): seed is required"
        );
    }

    #[test]
    fn test_env_substitution_escaped_dollar() {
        let (out, _) = expand("description: costs $$30", env(&[]));
        assert_eq!(out, "description: costs $30");
    }

    #[test]
    fn test_env_substitution_lone_dollar_kept() {
        let (out, _) = expand("name: $5 Bin", env(&[]));
        assert_eq!(out, "name: $5 Bin");
    }

    #[test]
    fn test_env_substitution_missing_warning() {
        let (out, warnings) = expand("seed: ${LOOTRUN_UNSET_XYZ}", env(&[]));
        assert_eq!(out, "seed: ");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("LOOTRUN_UNSET_XYZ"));
    }

    #[test]
    fn test_env_substitution_unclosed() {
        let mut warnings = Vec::new();
        let result = expand_env("seed: ${SEED", Path::new("t.yaml"), &env(&[]), &mut warnings);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_str_applies_env_and_validates() {
        let loader = ConfigLoader::default();
        let result = loader
            .load_str(
                "contest:\n  choice_timer: ${TURN}\n  seed: 7\n",
                &inline_source(),
                env(&[("TURN", "10s")]),
            )
            .unwrap();
        assert_eq!(result.config.contest.choice_timer, Duration::from_secs(10));
        assert_eq!(result.config.contest.seed, Some(7));
    }

    #[test]
    fn test_load_str_empty_is_default() {
        let result = ConfigLoader::default()
            .load_str("\u{feff}\n", &inline_source(), env(&[]))
            .unwrap();
        assert_eq!(*result.config, GameConfig::default());
    }

    #[test]
    fn test_load_str_reports_parse_line() {
        let err = ConfigLoader::default()
            .load_str("contest:\n  win_threshold: [\n", &inline_source(), env(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_str_rejects_invalid() {
        let err = ConfigLoader::default()
            .load_str("world:\n  locations: []\n", &inline_source(), env(&[]))
            .unwrap_err();
        match err {
            ConfigError::ValidationError { errors, .. } => {
                assert!(errors.iter().any(|e| e.path == "world.locations"));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigLoader::default()
            .load(Path::new("/nonexistent/lootrun.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn test_load_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.yaml");
        std::fs::write(&path, "# padding\n".repeat(20)).unwrap();
        let loader = ConfigLoader::new(ConfigLimits {
            max_config_size: 16,
            max_locations: 64,
        });
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "file_size"));
    }

    #[test]
    fn test_config_limits_default() {
        let limits = ConfigLimits::default();
        assert!(limits.max_config_size >= 1024);
        assert!(limits.max_locations >= 8);
    }
}
