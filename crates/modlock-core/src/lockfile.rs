//! Profiles and lockfiles: the persisted, reproducible record of a resolution.
//!
//! A [`ModProfile`] records the enabled packages with their exact versions in
//! load order, the file-conflict decisions, and a `sourceHash` over the inputs
//! that produced them. [`ProfileStore`] saves profiles as TOML documents using
//! an atomic write-replace so an interrupted save never corrupts a lockfile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use modlock_util::errors::ModlockError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::{FileAction, Strategy};
use crate::version::{SemanticVersion, VersionRange};

/// File extension of lockfiles inside a [`ProfileStore`].
pub const LOCKFILE_EXTENSION: &str = "lock.toml";

/// Errors raised while persisting or reading lockfiles.
#[derive(Debug, Error, Diagnostic)]
pub enum LockfileError {
    #[error("No lockfile for profile '{name}' at {}", .path.display())]
    #[diagnostic(help("Run a resolution for this profile first"))]
    NotFound { name: String, path: PathBuf },

    #[error("Lockfile for profile '{name}' is stale (recorded {recorded}, current {current})")]
    #[diagnostic(help("Package metadata or strategy changed since the lockfile was written; re-resolve"))]
    Stale {
        name: String,
        recorded: String,
        current: String,
    },

    #[error("Corrupt lockfile {}: {message}", .path.display())]
    CorruptFormat { path: PathBuf, message: String },

    #[error("Failed to serialize lockfile: {message}")]
    Serialize { message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<LockfileError> for ModlockError {
    fn from(e: LockfileError) -> Self {
        match e {
            LockfileError::Io { source, .. } => ModlockError::Io(source),
            other => ModlockError::Lockfile {
                message: other.to_string(),
            },
        }
    }
}

/// One package in load order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    pub package_id: String,
    pub version: SemanticVersion,
    pub enabled: bool,
    pub priority: i64,
}

/// A recorded decision about one conflicting file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDecision {
    pub path: String,
    pub winner_package_id: String,
    pub winner_version: SemanticVersion,
    pub action: FileAction,
    pub confidence: f64,
}

/// A top-level requirement the profile was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootRequirement {
    pub package_id: String,
    pub constraint: VersionRange,
}

impl RootRequirement {
    pub fn new(package_id: impl Into<String>, constraint: VersionRange) -> Self {
        Self {
            package_id: package_id.into(),
            constraint,
        }
    }

    /// Requirement accepting any version of `package_id`.
    pub fn any(package_id: impl Into<String>) -> Self {
        Self::new(package_id, VersionRange::any())
    }
}

/// The persisted unit of reproducibility.
///
/// Entry order is load order and decision order is index order; both are kept
/// exactly across save/load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModProfile {
    pub profile_name: String,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
    pub source_hash: String,
    #[serde(default)]
    pub strategy: Strategy,
    /// Whether file paths were grouped without regard to case.
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
    /// Explicit conflict priority (later outranks earlier); install order when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_order: Option<Vec<String>>,
    #[serde(default)]
    pub roots: Vec<RootRequirement>,
    #[serde(default)]
    pub entries: Vec<LockEntry>,
    #[serde(default)]
    pub file_conflict_decisions: Vec<ConflictDecision>,
}

fn default_case_insensitive() -> bool {
    true
}

impl ModProfile {
    /// An empty profile stamped with the current time.
    pub fn new(profile_name: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
            target_id: target_id.into(),
            created_at: Utc::now(),
            source_hash: String::new(),
            strategy: Strategy::default(),
            roots: Vec::new(),
            case_insensitive: true,
            priority_order: None,
            entries: Vec::new(),
            file_conflict_decisions: Vec::new(),
        }
    }

    pub fn entry(&self, package_id: &str) -> Option<&LockEntry> {
        self.entries.iter().find(|e| e.package_id == package_id)
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    /// Locked versions, used to prefer the recorded choice when re-resolving.
    pub fn pinned_versions(&self) -> BTreeMap<String, SemanticVersion> {
        self.entries
            .iter()
            .map(|e| (e.package_id.clone(), e.version.clone()))
            .collect()
    }

    /// Load order of the enabled packages.
    pub fn load_order(&self) -> Vec<String> {
        self.enabled_entries().map(|e| e.package_id.clone()).collect()
    }

    /// Serialize to a pretty-printed TOML document.
    pub fn to_string_pretty(&self) -> Result<String, LockfileError> {
        toml::to_string_pretty(self).map_err(|e| LockfileError::Serialize {
            message: e.to_string(),
        })
    }

    /// Serialize in the given format.
    pub fn to_format(&self, format: LockFormat) -> Result<String, LockfileError> {
        match format {
            LockFormat::Toml => self.to_string_pretty(),
            LockFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                LockfileError::Serialize {
                    message: e.to_string(),
                }
            }),
        }
    }

    /// Parse a document in the given format; `path` is only used for error reporting.
    pub fn from_format(content: &str, format: LockFormat, path: &Path) -> Result<Self, LockfileError> {
        let parsed = match format {
            LockFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            LockFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| LockfileError::CorruptFormat {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Serialization formats for export/import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFormat {
    Toml,
    Json,
}

impl LockFormat {
    /// Pick a format from a file extension; anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => LockFormat::Json,
            _ => LockFormat::Toml,
        }
    }
}

/// Replace characters that are invalid in file names on common filesystems.
pub fn sanitize_profile_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']).trim_start();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory of lockfiles, one per profile name.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the lockfile for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{LOCKFILE_EXTENSION}", sanitize_profile_name(name)))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Persist `profile`, superseding any earlier lockfile of the same name.
    pub fn save(&self, profile: &ModProfile) -> Result<PathBuf, LockfileError> {
        let path = self.path_for(&profile.profile_name);
        let content = profile.to_string_pretty()?;
        modlock_util::fs::atomic_write(&path, content.as_bytes()).map_err(|source| {
            LockfileError::Io {
                path: path.clone(),
                source,
            }
        })?;
        tracing::info!(
            "Saved lockfile for profile '{}' ({} entries) to {}",
            profile.profile_name,
            profile.entries.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load the lockfile for `name`.
    pub fn load(&self, name: &str) -> Result<ModProfile, LockfileError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(LockfileError::NotFound {
                name: name.to_string(),
                path,
            });
        }
        read_profile(&path, LockFormat::Toml)
    }

    /// Names of every readable profile in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, LockfileError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|source| LockfileError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let suffix = format!(".{LOCKFILE_EXTENSION}");
        let mut names = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_lockfile = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix));
            if !is_lockfile {
                continue;
            }
            match read_profile(&path, LockFormat::Toml) {
                Ok(profile) => names.push(profile.profile_name),
                Err(e) => tracing::warn!("Skipping unreadable lockfile {}: {e}", path.display()),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete the lockfile for `name`.
    pub fn remove(&self, name: &str) -> Result<(), LockfileError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(LockfileError::NotFound {
                name: name.to_string(),
                path,
            });
        }
        std::fs::remove_file(&path).map_err(|source| LockfileError::Io { path, source })
    }

    /// Write `profile` to an arbitrary path; the format follows the extension.
    pub fn export(&self, profile: &ModProfile, path: &Path) -> Result<(), LockfileError> {
        let content = profile.to_format(LockFormat::from_path(path))?;
        modlock_util::fs::atomic_write(path, content.as_bytes()).map_err(|source| {
            LockfileError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Read a profile previously written by [`ProfileStore::export`].
    pub fn import(&self, path: &Path) -> Result<ModProfile, LockfileError> {
        if !path.is_file() {
            return Err(LockfileError::NotFound {
                name: path.display().to_string(),
                path: path.to_path_buf(),
            });
        }
        read_profile(path, LockFormat::from_path(path))
    }
}

fn read_profile(path: &Path, format: LockFormat) -> Result<ModProfile, LockfileError> {
    let content = std::fs::read_to_string(path).map_err(|source| LockfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ModProfile::from_format(&content, format, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_profile_name("my profile"), "my profile");
        assert_eq!(sanitize_profile_name("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_profile_name("what?*"), "what__");
        assert_eq!(sanitize_profile_name("trailing. "), "trailing");
        assert_eq!(sanitize_profile_name(""), "_");
        assert_eq!(sanitize_profile_name(".."), "_");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(LockFormat::from_path(Path::new("a.json")), LockFormat::Json);
        assert_eq!(LockFormat::from_path(Path::new("a.JSON")), LockFormat::Json);
        assert_eq!(LockFormat::from_path(Path::new("a.lock.toml")), LockFormat::Toml);
        assert_eq!(LockFormat::from_path(Path::new("a")), LockFormat::Toml);
    }

    #[test]
    fn pinned_versions_and_load_order() {
        let mut profile = ModProfile::new("main", "skyrim");
        profile.entries.push(LockEntry {
            package_id: "b".into(),
            version: SemanticVersion::new(1, 0, 0),
            enabled: true,
            priority: 0,
        });
        profile.entries.push(LockEntry {
            package_id: "a".into(),
            version: SemanticVersion::new(2, 0, 0),
            enabled: false,
            priority: 1,
        });
        assert_eq!(profile.load_order(), vec!["b"]);
        assert_eq!(
            profile.pinned_versions().get("a"),
            Some(&SemanticVersion::new(2, 0, 0))
        );
        assert!(profile.entry("b").is_some());
        assert!(profile.entry("c").is_none());
    }
}
