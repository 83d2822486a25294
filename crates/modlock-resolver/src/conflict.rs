//! Resolution failures and their explanations.

use std::fmt;

use modlock_core::metadata::DependencyKind;
use modlock_core::version::{SemanticVersion, VersionRange};
use modlock_util::errors::ModlockError;

/// One link in an explanation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationStep {
    /// A requirement given by the caller.
    Root {
        package_id: String,
        constraint: VersionRange,
    },
    /// A declared edge of a selected node.
    Edge {
        /// The declaring node, as `package@version`.
        from: String,
        to: String,
        constraint: VersionRange,
        kind: DependencyKind,
    },
}

impl ExplanationStep {
    /// The package this step constrains.
    pub fn target(&self) -> &str {
        match self {
            ExplanationStep::Root { package_id, .. } => package_id,
            ExplanationStep::Edge { to, .. } => to,
        }
    }
}

impl fmt::Display for ExplanationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplanationStep::Root {
                package_id,
                constraint,
            } => write!(f, "root requires {package_id} {constraint}"),
            ExplanationStep::Edge {
                from,
                to,
                constraint,
                kind,
            } => write!(f, "{from} {kind} {to} {constraint}"),
        }
    }
}

/// Why resolution failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Required edges among the selected packages form a loop.
    Cycle { packages: Vec<String> },
    /// No candidate satisfies the accumulated constraints.
    Unsatisfiable,
    /// An incompatibility rules out every candidate left.
    IncompatiblePair,
    /// A root names a package no source provides.
    MissingPackage,
    /// The visit budget ran out before a verdict.
    Timeout { visits: u64, budget: u64 },
    /// The caller's cancellation flag was raised.
    Cancelled,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Cycle { .. } => f.write_str("dependency cycle"),
            ConflictKind::Unsatisfiable => f.write_str("unsatisfiable constraints"),
            ConflictKind::IncompatiblePair => f.write_str("incompatible packages"),
            ConflictKind::MissingPackage => f.write_str("missing package"),
            ConflictKind::Timeout { .. } => f.write_str("search budget exhausted"),
            ConflictKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A failed resolution with the smallest explanation found.
///
/// `derivations` holds one chain per conflicting constraint, each leading
/// from a root requirement through selected nodes to the constraint itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionConflict {
    pub kind: ConflictKind,
    /// The package that could not be selected, if there is one.
    pub package_id: Option<String>,
    /// Version already selected for `package_id` when a later constraint rejected it.
    pub selected_version: Option<SemanticVersion>,
    pub derivations: Vec<Vec<ExplanationStep>>,
}

impl ResolutionConflict {
    pub fn new(kind: ConflictKind) -> Self {
        Self {
            kind,
            package_id: None,
            selected_version: None,
            derivations: Vec::new(),
        }
    }

    /// All explanation steps, chain after chain.
    pub fn steps(&self) -> impl Iterator<Item = &ExplanationStep> {
        self.derivations.iter().flatten()
    }

    /// The constraints that clash: the last step of every chain.
    pub fn conflicting_steps(&self) -> Vec<&ExplanationStep> {
        self.derivations.iter().filter_map(|d| d.last()).collect()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ConflictKind::Timeout { .. })
    }
}

impl fmt::Display for ResolutionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.package_id) {
            (ConflictKind::Cycle { packages }, _) => {
                write!(f, "Dependency cycle: ")?;
                for p in packages {
                    write!(f, "{p} -> ")?;
                }
                write!(f, "{}", packages.first().map(String::as_str).unwrap_or(""))?;
            }
            (ConflictKind::MissingPackage, Some(p)) => {
                write!(f, "Package '{p}' is not provided by any metadata source")?;
            }
            (ConflictKind::Timeout { visits, budget }, _) => {
                write!(f, "Gave up after {visits} of {budget} allowed visits")?;
            }
            (ConflictKind::Cancelled, _) => write!(f, "Resolution was cancelled")?,
            (kind, Some(p)) => {
                write!(f, "Cannot select a version of '{p}' ({kind})")?;
                if let Some(v) = &self.selected_version {
                    write!(f, "; {p}@{v} was already selected")?;
                }
            }
            (kind, None) => write!(f, "Resolution failed ({kind})")?,
        }

        for chain in &self.derivations {
            for (depth, step) in chain.iter().enumerate() {
                write!(f, "\n  {:indent$}{step}", "", indent = depth * 2)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ResolutionConflict {}

impl From<ResolutionConflict> for ModlockError {
    fn from(c: ResolutionConflict) -> Self {
        ModlockError::Resolution {
            message: c.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn step_display() {
        let root = ExplanationStep::Root {
            package_id: "a".into(),
            constraint: range("*"),
        };
        assert_eq!(root.to_string(), "root requires a *");
        let edge = ExplanationStep::Edge {
            from: "a@1.0.0".into(),
            to: "c".into(),
            constraint: range(">=2.0"),
            kind: DependencyKind::Required,
        };
        assert_eq!(edge.to_string(), "a@1.0.0 requires c >=2.0.0");
        assert_eq!(edge.target(), "c");
    }

    #[test]
    fn conflict_report_indents_chains() {
        let conflict = ResolutionConflict {
            kind: ConflictKind::Unsatisfiable,
            package_id: Some("c".into()),
            selected_version: None,
            derivations: vec![vec![
                ExplanationStep::Root {
                    package_id: "a".into(),
                    constraint: range("*"),
                },
                ExplanationStep::Edge {
                    from: "a@1.0.0".into(),
                    to: "c".into(),
                    constraint: range(">=2.0"),
                    kind: DependencyKind::Required,
                },
            ]],
        };
        let s = conflict.to_string();
        assert!(s.starts_with("Cannot select a version of 'c' (unsatisfiable constraints)"));
        assert!(s.contains("\n  root requires a *"));
        assert!(s.contains("\n    a@1.0.0 requires c >=2.0.0"));
        assert_eq!(conflict.conflicting_steps().len(), 1);
    }

    #[test]
    fn cycle_display() {
        let conflict = ResolutionConflict::new(ConflictKind::Cycle {
            packages: vec!["a".into(), "b".into()],
        });
        assert_eq!(conflict.to_string(), "Dependency cycle: a -> b -> a");
    }

    #[test]
    fn converts_to_unified_error() {
        let err: ModlockError = ResolutionConflict::new(ConflictKind::Cancelled).into();
        assert_eq!(
            err.to_string(),
            "Dependency resolution failed: Resolution was cancelled"
        );
    }
}
