use std::io::Write;
use std::time::Duration;

use lootrun::config::{ConfigLimits, ConfigLoader};
use lootrun::error::ConfigError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn load(contents: &str) -> Result<lootrun::config::LoadResult, ConfigError> {
    let file = write_config(contents);
    ConfigLoader::default().load(file.path())
}

fn issue_paths(err: &ConfigError) -> Vec<String> {
    match err {
        ConfigError::ValidationError { errors, .. } => {
            errors.iter().map(|issue| issue.path.clone()).collect()
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn full_config_round_trips_into_types() {
    let result = load(
        r"
contest:
  shop_timer: 10s
  choice_timer: 45s
  escape_timer: 1m
  resolve_pause: 500ms
  win_threshold: 250
  min_players: 3
  max_players: 5
  seed: 99
world:
  stake_variance: 0.1
  locations:
    - name: Docks
      emoji: ⚓
      base_points: 12
      escape_options:
        - { id: hide_container, name: Container, kind: hide }
        - { id: run_pier, name: Pier, kind: run, keep_amount: 0.6 }
    - name: Casino
      base_points: 40
      escape_options:
        - { id: hide_vip, name: VIP Room, kind: hide }
",
    )
    .expect("config loads");

    let config = result.config;
    assert_eq!(config.contest.choice_timer, Duration::from_secs(45));
    assert_eq!(config.contest.escape_timer, Duration::from_secs(60));
    assert_eq!(config.contest.resolve_pause, Duration::from_millis(500));
    assert_eq!(config.contest.seed, Some(99));
    assert_eq!(config.world.locations.len(), 2);
    assert_eq!(
        config.world.locations[0].escape_options[1].keep_amount,
        Some(0.6)
    );
    // Untouched sections keep their defaults.
    assert!(config.contest.auto_start);
    assert_eq!(config.world.shop.len(), 3);
}

#[test]
fn invalid_yaml_is_a_parse_error() {
    let err = load("contest: [unclosed").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }), "{err}");
}

#[test]
fn unknown_fields_are_rejected() {
    let err = load("contest:\n  choise_timer: 10s\n").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }), "{err}");
}

#[test]
fn empty_location_list_is_rejected() {
    let err = load("world:\n  locations: []\n").unwrap_err();
    assert!(issue_paths(&err).contains(&"world.locations".to_string()));
}

#[test]
fn zero_timers_are_rejected() {
    let err = load("contest:\n  choice_timer: 0s\n  escape_timer: 0s\n").unwrap_err();
    let paths = issue_paths(&err);
    assert!(paths.contains(&"contest.choice_timer".to_string()));
    assert!(paths.contains(&"contest.escape_timer".to_string()));
}

#[test]
fn duplicate_escape_ids_are_rejected() {
    let err = load(
        r"
world:
  locations:
    - name: Docks
      base_points: 12
      escape_options:
        - { id: dive, name: Dive, kind: run }
        - { id: dive, name: Dive Again, kind: hide }
",
    )
    .unwrap_err();
    assert!(
        issue_paths(&err)
            .iter()
            .any(|path| path.starts_with("world.locations[0].escape_options"))
    );
}

#[test]
fn warnings_do_not_block_loading() {
    let result = load(
        r"
contest:
  auto_start: false
world:
  locations:
    - name: Rooftop
      base_points: 5
",
    )
    .expect("warnings only");
    assert!(result.warnings.len() >= 2);
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.location.as_deref() == Some("world.locations[0].escape_options"))
    );
}

#[test]
fn missing_file_is_reported() {
    let err = ConfigLoader::default()
        .load(std::path::Path::new("/nonexistent/lootrun.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingFile { .. }));
}

#[test]
fn oversized_file_is_rejected() {
    let file = write_config(&"# padding\n".repeat(64));
    let loader = ConfigLoader::new(ConfigLimits {
        max_config_size: 128,
        max_locations: 64,
    });
    let err = loader.load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err}");
}
