use std::collections::HashMap;

use modlock_core::config::{dirs_path, ModlockConfig, DEFAULT_VISIT_BUDGET};
use modlock_core::decision::Strategy;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = ModlockConfig::default();
    assert_eq!(config.resolver.visit_budget, DEFAULT_VISIT_BUDGET);
    assert_eq!(config.conflicts.strategy, Strategy::Automatic);
    assert!(config.index.case_insensitive);
    assert_eq!(config.profiles.dir, "~/.modlock/profiles");
}

#[test]
fn test_empty_toml_uses_defaults() {
    let config: ModlockConfig = toml::from_str("").unwrap();
    assert_eq!(config, ModlockConfig::default());
}

#[test]
fn test_parse_from_toml() {
    let toml = r#"
[resolver]
visit-budget = 500

[conflicts]
strategy = "conservative"

[index]
case-insensitive = false

[profiles]
dir = "/srv/profiles"
"#;
    let config: ModlockConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.resolver.visit_budget, 500);
    assert_eq!(config.conflicts.strategy, Strategy::Conservative);
    assert!(!config.index.case_insensitive);
    assert_eq!(config.profile_dir(), std::path::PathBuf::from("/srv/profiles"));
}

#[test]
fn test_missing_file_gives_defaults() {
    let tmp = TempDir::new().unwrap();
    let config = ModlockConfig::load_file(&tmp.path().join("config.toml")).unwrap();
    assert_eq!(config, ModlockConfig::default());
}

#[test]
fn test_unparsable_file_is_config_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[resolver]\nvisit-budget = \"lots\"").unwrap();
    let err = ModlockConfig::load_file(&path).unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"), "got: {err}");
}

#[test]
fn test_env_overrides_file() {
    let mut config: ModlockConfig = toml::from_str("[resolver]\nvisit-budget = 10").unwrap();
    config
        .apply_env(env(&[
            ("MODLOCK_VISIT_BUDGET", "42"),
            ("MODLOCK_STRATEGY", "aggressive"),
            ("MODLOCK_PROFILE_DIR", "/tmp/p"),
        ]))
        .unwrap();
    assert_eq!(config.resolver.visit_budget, 42);
    assert_eq!(config.conflicts.strategy, Strategy::Aggressive);
    assert_eq!(config.profiles.dir, "/tmp/p");
}

#[test]
fn test_invalid_env_is_rejected() {
    let mut config = ModlockConfig::default();
    assert!(config
        .apply_env(env(&[("MODLOCK_VISIT_BUDGET", "many")]))
        .is_err());
    assert!(config
        .apply_env(env(&[("MODLOCK_STRATEGY", "random")]))
        .is_err());
}

#[test]
fn test_home_expansion() {
    let config = ModlockConfig::default();
    let dir = config.profile_dir();
    assert!(dir.ends_with(".modlock/profiles"), "got {}", dir.display());
    assert!(!dir.to_string_lossy().starts_with('~'));
}

#[test]
fn test_dirs_path_contains_modlock() {
    assert!(dirs_path().ends_with(".modlock"));
    assert!(ModlockConfig::default_path().ends_with(".modlock/config.toml"));
}
