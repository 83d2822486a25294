//! Package metadata as delivered by the (external) metadata source.
//!
//! The network/cache layer that actually fetches release listings lives
//! outside this workspace; it hands releases to the resolver through
//! [`MetadataSource`]. [`StaticSource`] is an in-memory implementation that
//! can also be loaded from a TOML catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use modlock_util::errors::ModlockError;
use serde::{Deserialize, Serialize};

/// How one package relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Must be satisfied for a valid resolution.
    Required,
    /// Influences load ordering, never blocks resolution.
    Optional,
    /// Matching versions may not be selected together with the declaring package.
    Incompatible,
    /// The declaring package's content subsumes the target's.
    Embedded,
}

impl Default for DependencyKind {
    fn default() -> Self {
        Self::Required
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyKind::Required => "requires",
            DependencyKind::Optional => "optionally uses",
            DependencyKind::Incompatible => "is incompatible with",
            DependencyKind::Embedded => "embeds",
        };
        f.write_str(s)
    }
}

/// A dependency as declared by a release, before its range is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeclaredDependency {
    pub package_id: String,
    #[serde(default = "any_range")]
    pub range: String,
    #[serde(default)]
    pub kind: DependencyKind,
}

fn any_range() -> String {
    "*".to_string()
}

impl DeclaredDependency {
    pub fn new(package_id: impl Into<String>, range: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            package_id: package_id.into(),
            range: range.into(),
            kind,
        }
    }

    pub fn required(package_id: impl Into<String>, range: impl Into<String>) -> Self {
        Self::new(package_id, range, DependencyKind::Required)
    }
}

/// One file shipped by a release, with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub hash: String,
}

/// One available version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackageRelease {
    pub package_id: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<DeclaredDependency>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl PackageRelease {
    pub fn new(package_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            version: version.into(),
            dependencies: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn depends(mut self, dep: DeclaredDependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn requires(self, package_id: &str, range: &str) -> Self {
        self.depends(DeclaredDependency::required(package_id, range))
    }

    pub fn file(mut self, path: impl Into<String>, hash: impl Into<String>) -> Self {
        self.files.push(FileEntry {
            path: path.into(),
            hash: hash.into(),
        });
        self
    }
}

/// Supplier of available package releases.
pub trait MetadataSource {
    /// Every package id this source knows about.
    fn package_ids(&self) -> Vec<String>;

    /// All releases of one package. Unknown ids yield an empty list.
    fn releases(&self, package_id: &str) -> Result<Vec<PackageRelease>, ModlockError>;
}

/// In-memory metadata source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSource {
    #[serde(default, rename = "release")]
    releases: Vec<PackageRelease>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, release: PackageRelease) -> &mut Self {
        self.releases.push(release);
        self
    }

    pub fn with(mut self, release: PackageRelease) -> Self {
        self.releases.push(release);
        self
    }

    /// Parse a TOML catalog made of `[[release]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self, ModlockError> {
        toml::from_str(content).map_err(|e| ModlockError::Metadata {
            message: format!("Failed to parse metadata catalog: {e}"),
        })
    }

    /// Load a TOML catalog from disk.
    pub fn from_path(path: &Path) -> Result<Self, ModlockError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModlockError::Metadata {
            message: format!("Failed to read metadata catalog {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }
}

impl MetadataSource for StaticSource {
    fn package_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.releases.iter().map(|r| r.package_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn releases(&self, package_id: &str) -> Result<Vec<PackageRelease>, ModlockError> {
        Ok(self
            .releases
            .iter()
            .filter(|r| r.package_id == package_id)
            .cloned()
            .collect())
    }
}

/// Installed state reported by the deployment layer: package id → installed
/// version → installed file manifest (path → hash).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledSnapshot {
    #[serde(default)]
    pub packages: BTreeMap<String, InstalledPackage>,
}

/// One installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub version: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl InstalledSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package_id: impl Into<String>, version: impl Into<String>) -> &mut Self {
        self.packages.insert(
            package_id.into(),
            InstalledPackage {
                version: version.into(),
                files: BTreeMap::new(),
            },
        );
        self
    }
}
