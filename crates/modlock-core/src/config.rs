use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use modlock_util::errors::ModlockError;

use crate::decision::Strategy;

/// Default node-visit budget for the backtracking resolver.
pub const DEFAULT_VISIT_BUDGET: u64 = 100_000;

/// User configuration loaded from `~/.modlock/config.toml`.
///
/// Environment variables override file values, which override defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModlockConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub conflicts: ConflictsConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub profiles: ProfilesConfig,
}

/// Resolver settings from `[resolver]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_visit_budget", rename = "visit-budget")]
    pub visit_budget: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            visit_budget: default_visit_budget(),
        }
    }
}

fn default_visit_budget() -> u64 {
    DEFAULT_VISIT_BUDGET
}

/// File-conflict settings from `[conflicts]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictsConfig {
    #[serde(default)]
    pub strategy: Strategy,
}

/// File index settings from `[index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_case_insensitive", rename = "case-insensitive")]
    pub case_insensitive: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            case_insensitive: default_case_insensitive(),
        }
    }
}

fn default_case_insensitive() -> bool {
    true
}

/// Profile storage settings from `[profiles]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilesConfig {
    #[serde(default = "default_profiles_dir")]
    pub dir: String,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            dir: default_profiles_dir(),
        }
    }
}

fn default_profiles_dir() -> String {
    "~/.modlock/profiles".to_string()
}

impl ModlockConfig {
    /// Load from the default path and the process environment.
    pub fn load() -> miette::Result<Self> {
        let mut config = Self::load_file(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a config file, or return defaults if it doesn't exist.
    pub fn load_file(path: &Path) -> Result<Self, ModlockError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ModlockError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&content).map_err(|e| ModlockError::Config {
            message: format!("Failed to parse {}: {e}", path.display()),
        })
    }

    /// Apply `MODLOCK_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ModlockError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MODLOCK_VISIT_BUDGET") {
            self.resolver.visit_budget =
                raw.trim().parse().map_err(|e| ModlockError::Config {
                    message: format!("MODLOCK_VISIT_BUDGET='{raw}' is not a number: {e}"),
                })?;
        }
        if let Some(raw) = lookup("MODLOCK_STRATEGY") {
            self.conflicts.strategy = raw.parse().map_err(|e: String| ModlockError::Config {
                message: format!("MODLOCK_STRATEGY: {e}"),
            })?;
        }
        if let Some(raw) = lookup("MODLOCK_PROFILE_DIR") {
            if raw.trim().is_empty() {
                tracing::warn!("Ignoring empty MODLOCK_PROFILE_DIR");
            } else {
                self.profiles.dir = raw;
            }
        }
        Ok(())
    }

    /// The profile directory with a leading `~` expanded.
    pub fn profile_dir(&self) -> PathBuf {
        expand_home(&self.profiles.dir)
    }

    /// Returns the default path to the config file.
    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

/// Returns the path to the modlock data directory (`~/.modlock/`).
pub fn dirs_path() -> PathBuf {
    home_dir().join(".modlock")
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => home_dir().join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
    }
}
