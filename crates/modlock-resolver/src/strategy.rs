//! Settling file conflicts under a [`Strategy`].
//!
//! The priority list ranks packages: a later entry outranks an earlier one,
//! packages missing from the list rank below all listed ones, and ties fall
//! back to install order (later owner wins). Confidence grows with the rank
//! gap between the winner and the runner-up.

use std::collections::BTreeMap;
use std::fmt;

use miette::Diagnostic;
use modlock_core::decision::{FileAction, Strategy};
use modlock_core::lockfile::ConflictDecision;
use thiserror::Error;

use crate::files::{FileConflict, FileConflictKind};
use crate::graph::ModNode;

/// The settlement proposed (or chosen) for one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    pub conflict: FileConflict,
    pub winner: ModNode,
    pub action: FileAction,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Where a conflict stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    AutoResolved,
    NeedsUserInput,
    Skipped,
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionState::Unresolved => "unresolved",
            ResolutionState::AutoResolved => "auto-resolved",
            ResolutionState::NeedsUserInput => "needs input",
            ResolutionState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl ConflictResolution {
    pub fn state(&self) -> ResolutionState {
        match self.action {
            FileAction::PromptUser => ResolutionState::NeedsUserInput,
            FileAction::SkipFile => ResolutionState::Skipped,
            FileAction::KeepWinner | FileAction::MergeContent => ResolutionState::AutoResolved,
        }
    }

    /// The lockfile record for this settlement.
    pub fn to_decision(&self) -> ConflictDecision {
        ConflictDecision {
            path: self.conflict.path.clone(),
            winner_package_id: self.winner.package_id().to_string(),
            winner_version: self.winner.version().clone(),
            action: self.action,
            confidence: self.confidence,
        }
    }
}

/// An answer to a [`FileAction::PromptUser`] settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserChoice {
    /// Keep this owner's copy.
    Keep(String),
    /// Install none of the copies.
    Skip,
    /// Hand the copies to the merge layer.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ChoiceError {
    #[error("'{package_id}' does not provide '{path}'")]
    #[diagnostic(help("Pick one of the packages that ship this file"))]
    NotAnOwner { path: String, package_id: String },

    #[error("No conflict is recorded for '{path}'")]
    UnknownPath { path: String },
}

/// Settle every conflict under `strategy`.
pub fn resolve_conflicts(
    conflicts: &[FileConflict],
    strategy: Strategy,
    priority_order: &[String],
) -> Vec<ConflictResolution> {
    conflicts
        .iter()
        .filter_map(|c| resolve_one(c, strategy, priority_order))
        .collect()
}

fn resolve_one(
    conflict: &FileConflict,
    strategy: Strategy,
    priority_order: &[String],
) -> Option<ConflictResolution> {
    if strategy == Strategy::Manual {
        let winner = conflict.last_owner()?.clone();
        return Some(ConflictResolution {
            conflict: conflict.clone(),
            winner,
            action: FileAction::PromptUser,
            confidence: 0.0,
        });
    }

    let (winner, gap) = by_priority(&conflict.owners, priority_order)?;
    let confidence = match conflict.kind {
        FileConflictKind::IdenticalFiles => 1.0,
        _ => 0.5 + 0.5 * gap as f64 / (gap as f64 + 1.0),
    };
    let action = match (strategy, conflict.kind) {
        (Strategy::Conservative, _) => FileAction::PromptUser,
        (Strategy::Automatic, FileConflictKind::MergeCandidate) => FileAction::PromptUser,
        _ => FileAction::KeepWinner,
    };

    tracing::debug!(
        "{} ({}): {} {} ({confidence:.2})",
        conflict.path,
        conflict.kind,
        action,
        winner
    );
    Some(ConflictResolution {
        conflict: conflict.clone(),
        winner: winner.clone(),
        action,
        confidence,
    })
}

/// The highest-ranked owner and its rank gap to the runner-up.
fn by_priority<'n>(owners: &'n [ModNode], priority_order: &[String]) -> Option<(&'n ModNode, u64)> {
    let rank = |node: &ModNode| -> i64 {
        priority_order
            .iter()
            .position(|p| p == node.package_id())
            .map_or(-1, |i| i as i64)
    };

    let mut ranked: Vec<(i64, usize, &ModNode)> = owners
        .iter()
        .enumerate()
        .map(|(i, node)| (rank(node), i, node))
        .collect();
    ranked.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

    let (top_rank, _, winner) = *ranked.first()?;
    let gap = match ranked.get(1) {
        Some(&(runner_up, _, _)) => (top_rank - runner_up) as u64,
        None => 0,
    };
    Some((winner, gap))
}

/// Turn a user's answer into a final settlement.
pub fn apply_user_choice(
    resolution: &ConflictResolution,
    choice: &UserChoice,
) -> Result<ConflictResolution, ChoiceError> {
    let mut decided = resolution.clone();
    decided.confidence = 1.0;
    match choice {
        UserChoice::Keep(package_id) => {
            let owner = resolution.conflict.owner(package_id).ok_or_else(|| {
                ChoiceError::NotAnOwner {
                    path: resolution.conflict.path.clone(),
                    package_id: package_id.clone(),
                }
            })?;
            decided.winner = owner.clone();
            decided.action = FileAction::KeepWinner;
        }
        UserChoice::Skip => decided.action = FileAction::SkipFile,
        UserChoice::Merge => decided.action = FileAction::MergeContent,
    }
    Ok(decided)
}

/// All settlements of one resolution, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    resolutions: BTreeMap<String, ConflictResolution>,
}

impl ResolutionPlan {
    pub fn new(conflicts: &[FileConflict], strategy: Strategy, priority_order: &[String]) -> Self {
        Self::from_resolutions(resolve_conflicts(conflicts, strategy, priority_order))
    }

    pub fn from_resolutions(resolutions: Vec<ConflictResolution>) -> Self {
        Self {
            resolutions: resolutions
                .into_iter()
                .map(|r| (r.conflict.path.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&ConflictResolution> {
        self.resolutions.get(path)
    }

    /// [`ResolutionState::Unresolved`] for paths the plan does not cover.
    pub fn state_of(&self, path: &str) -> ResolutionState {
        self.resolutions
            .get(path)
            .map_or(ResolutionState::Unresolved, ConflictResolution::state)
    }

    /// Settlements still waiting for the user, by path.
    pub fn pending(&self) -> impl Iterator<Item = &ConflictResolution> {
        self.resolutions
            .values()
            .filter(|r| r.state() == ResolutionState::NeedsUserInput)
    }

    pub fn is_complete(&self) -> bool {
        self.pending().next().is_none()
    }

    /// Record a user's answer for `path`.
    pub fn apply(&mut self, path: &str, choice: &UserChoice) -> Result<(), ChoiceError> {
        let current = self
            .resolutions
            .get(path)
            .ok_or_else(|| ChoiceError::UnknownPath {
                path: path.to_string(),
            })?;
        let decided = apply_user_choice(current, choice)?;
        self.resolutions.insert(path.to_string(), decided);
        Ok(())
    }

    pub fn resolutions(&self) -> impl Iterator<Item = &ConflictResolution> {
        self.resolutions.values()
    }

    /// Lockfile records, sorted by path.
    pub fn decisions(&self) -> Vec<ConflictDecision> {
        self.resolutions.values().map(ConflictResolution::to_decision).collect()
    }

    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }
}
