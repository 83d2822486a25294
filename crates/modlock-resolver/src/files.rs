//! Index of which selected packages provide which file paths.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::Diagnostic;
use modlock_core::metadata::DependencyKind;
use thiserror::Error;

use crate::graph::{DependencyGraph, ModNode};
use crate::resolver::Selection;

/// A manifest path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("Invalid path '{path}' from {owner}: {reason}")]
#[diagnostic(help("Package file paths must be relative and stay inside the install directory"))]
pub struct ConflictIndexError {
    pub path: String,
    pub owner: String,
    pub reason: String,
}

/// How the owners of one path disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileConflictKind {
    /// Different content; one owner has to win.
    Overwrite,
    /// Same content hash everywhere; harmless.
    IdenticalFiles,
    /// Different content, but one owner embeds another.
    MergeCandidate,
}

impl fmt::Display for FileConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileConflictKind::Overwrite => "overwrite",
            FileConflictKind::IdenticalFiles => "identical",
            FileConflictKind::MergeCandidate => "merge candidate",
        };
        f.write_str(s)
    }
}

/// A path provided by two or more selected packages.
#[derive(Debug, Clone, PartialEq)]
pub struct FileConflict {
    /// Normalized path, spelled as first registered.
    pub path: String,
    /// Owners in install order.
    pub owners: Vec<ModNode>,
    /// Content hash per owner, parallel to `owners`.
    pub hashes: Vec<String>,
    pub kind: FileConflictKind,
}

impl FileConflict {
    pub fn owner(&self, package_id: &str) -> Option<&ModNode> {
        self.owners.iter().find(|o| o.package_id() == package_id)
    }

    pub fn last_owner(&self) -> Option<&ModNode> {
        self.owners.last()
    }
}

#[derive(Debug, Clone)]
struct PathEntry {
    display: String,
    owners: Vec<(ModNode, String)>,
}

/// Path → owners map over one resolved set.
#[derive(Debug, Clone)]
pub struct FileConflictIndex {
    case_insensitive: bool,
    entries: BTreeMap<String, PathEntry>,
    install_order: Vec<String>,
    /// Unordered package pairs with an Embedded relation, smaller id first.
    embedded: BTreeSet<(String, String)>,
}

impl Default for FileConflictIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FileConflictIndex {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            case_insensitive,
            entries: BTreeMap::new(),
            install_order: Vec::new(),
            embedded: BTreeSet::new(),
        }
    }

    /// Index every file of every selected node, in install order, and record
    /// the Embedded relations between selected packages.
    pub fn from_selection(
        graph: &DependencyGraph,
        selection: &Selection,
        case_insensitive: bool,
    ) -> Result<Self, ConflictIndexError> {
        let mut index = Self::new(case_insensitive);
        index.set_install_order(selection.order().to_vec());

        for node in selection.in_order() {
            for (path, hash) in node.files() {
                index.register_file(node, path, hash)?;
            }
        }

        for (package, &id) in selection.ids() {
            for (_, edge) in graph.edges_from(id) {
                if edge.kind != DependencyKind::Embedded {
                    continue;
                }
                if let Some(target) = selection.get(&edge.to) {
                    if edge.constraint.matches(target.version()) {
                        index.declare_embedded(package, &edge.to);
                    }
                }
            }
        }

        tracing::debug!(
            "Indexed {} path(s) from {} package(s)",
            index.len(),
            selection.len()
        );
        Ok(index)
    }

    /// Owners are reported in this order; unknown packages go last.
    pub fn set_install_order(&mut self, order: Vec<String>) {
        self.install_order = order;
    }

    /// Mark `a` and `b` as related by embedding (direction does not matter).
    pub fn declare_embedded(&mut self, a: &str, b: &str) {
        let pair = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.embedded.insert(pair);
    }

    /// Record that `owner` ships `path` with content `hash`.
    ///
    /// Registering the same path again for the same owner replaces the
    /// earlier hash.
    pub fn register_file(
        &mut self,
        owner: &ModNode,
        path: &str,
        hash: &str,
    ) -> Result<(), ConflictIndexError> {
        let normalized = normalize_path(path).map_err(|reason| ConflictIndexError {
            path: path.to_string(),
            owner: owner.to_string(),
            reason: reason.to_string(),
        })?;
        let key = if self.case_insensitive {
            normalized.to_lowercase()
        } else {
            normalized.clone()
        };

        let entry = self.entries.entry(key).or_insert_with(|| PathEntry {
            display: normalized,
            owners: Vec::new(),
        });
        match entry.owners.iter_mut().find(|(o, _)| o == owner) {
            Some(existing) => existing.1 = hash.to_string(),
            None => entry.owners.push((owner.clone(), hash.to_string())),
        }
        Ok(())
    }

    /// Owners of a path, in install order.
    pub fn owners_of(&self, path: &str) -> Vec<&ModNode> {
        let Ok(normalized) = normalize_path(path) else {
            return Vec::new();
        };
        let key = if self.case_insensitive {
            normalized.to_lowercase()
        } else {
            normalized
        };
        match self.entries.get(&key) {
            Some(entry) => self.ordered(entry).into_iter().map(|(o, _)| o).collect(),
            None => Vec::new(),
        }
    }

    /// Every path with two or more owners, sorted by path.
    pub fn conflicts(&self) -> Vec<FileConflict> {
        let mut conflicts: Vec<FileConflict> = self
            .entries
            .values()
            .filter(|entry| entry.owners.len() > 1)
            .map(|entry| {
                let ordered = self.ordered(entry);
                let kind = self.classify(&ordered);
                FileConflict {
                    path: entry.display.clone(),
                    owners: ordered.iter().map(|(o, _)| (*o).clone()).collect(),
                    hashes: ordered.iter().map(|(_, h)| h.to_string()).collect(),
                    kind,
                }
            })
            .collect();
        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        conflicts
    }

    fn ordered<'e>(&self, entry: &'e PathEntry) -> Vec<(&'e ModNode, &'e str)> {
        let mut owners: Vec<(&ModNode, &str)> = entry
            .owners
            .iter()
            .map(|(o, h)| (o, h.as_str()))
            .collect();
        owners.sort_by(|(a, _), (b, _)| {
            let rank = |n: &ModNode| {
                self.install_order
                    .iter()
                    .position(|p| p == n.package_id())
                    .unwrap_or(usize::MAX)
            };
            rank(a)
                .cmp(&rank(b))
                .then_with(|| a.package_id().cmp(b.package_id()))
                .then_with(|| a.version().cmp(b.version()))
        });
        owners
    }

    fn classify(&self, owners: &[(&ModNode, &str)]) -> FileConflictKind {
        let first = owners.first().map(|(_, h)| *h).unwrap_or("");
        if owners.iter().all(|(_, h)| h.eq_ignore_ascii_case(first)) {
            return FileConflictKind::IdenticalFiles;
        }
        for (i, (a, _)) in owners.iter().enumerate() {
            for (b, _) in &owners[i + 1..] {
                if self.is_embedded(a.package_id(), b.package_id()) {
                    return FileConflictKind::MergeCandidate;
                }
            }
        }
        FileConflictKind::Overwrite
    }

    fn is_embedded(&self, a: &str, b: &str) -> bool {
        let (x, y) = if a <= b { (a, b) } else { (b, a) };
        self.embedded.contains(&(x.to_string(), y.to_string()))
    }

    /// Number of distinct paths indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalize a manifest path: `\` becomes `/`, empty and `.` segments are
/// dropped. Absolute paths, drive letters and `..` segments are rejected.
pub fn normalize_path(path: &str) -> Result<String, &'static str> {
    let unified = path.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err("empty path");
    }
    if unified.starts_with('/') {
        return Err("absolute path");
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err("absolute path with drive letter");
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err("parent directory segment"),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err("empty path");
    }
    Ok(segments.join("/"))
}
