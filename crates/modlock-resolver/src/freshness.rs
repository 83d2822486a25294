//! Whether a lockfile still matches its inputs and the installed state.

use modlock_core::lockfile::{LockfileError, ModProfile};
use modlock_core::metadata::InstalledSnapshot;
use modlock_core::version::SemanticVersion;
use modlock_util::hash::FieldHasher;

use crate::graph::DependencyGraph;

/// Fingerprint of everything a resolution depends on: the graph, the root
/// requirements (order-insensitive), the file-conflict strategy, path case
/// folding and the explicit priority order recorded in `profile`.
pub fn source_hash(graph: &DependencyGraph, profile: &ModProfile) -> String {
    let mut hasher = FieldHasher::new();
    hasher.field("modlock-source-v1");
    graph.fingerprint(&mut hasher);

    let mut rendered: Vec<String> = profile
        .roots
        .iter()
        .map(|r| format!("{} {}", r.package_id, r.constraint))
        .collect();
    rendered.sort();
    for root in &rendered {
        hasher.field("root").field(root);
    }
    hasher.field("strategy").field(profile.strategy.as_str());
    hasher
        .field("case-insensitive")
        .field(if profile.case_insensitive { "yes" } else { "no" });
    if let Some(order) = &profile.priority_order {
        hasher.field("priority");
        for package_id in order {
            hasher.field(package_id);
        }
    }
    hasher.finish()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale { recorded: String, current: String },
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

/// Compare a profile's recorded source hash with the current inputs.
pub fn validate(profile: &ModProfile, graph: &DependencyGraph) -> Freshness {
    let current = source_hash(graph, profile);
    if current == profile.source_hash {
        Freshness::Fresh
    } else {
        tracing::info!(
            "Lockfile for profile '{}' is stale",
            profile.profile_name
        );
        Freshness::Stale {
            recorded: profile.source_hash.clone(),
            current,
        }
    }
}

/// [`validate`], turning staleness into an error.
pub fn ensure_fresh(profile: &ModProfile, graph: &DependencyGraph) -> Result<(), LockfileError> {
    match validate(profile, graph) {
        Freshness::Fresh => Ok(()),
        Freshness::Stale { recorded, current } => Err(LockfileError::Stale {
            name: profile.profile_name.clone(),
            recorded,
            current,
        }),
    }
}

/// A locked package installed at another version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDrift {
    pub package_id: String,
    pub locked: SemanticVersion,
    /// As reported by the deployment layer; may not parse.
    pub installed: String,
}

/// Differences between a profile and what is actually installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Enabled in the profile, not installed.
    pub missing: Vec<String>,
    pub version_mismatches: Vec<VersionDrift>,
    /// Installed, not enabled in the profile.
    pub untracked: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.version_mismatches.is_empty() && self.untracked.is_empty()
    }
}

pub fn detect_drift(profile: &ModProfile, installed: &InstalledSnapshot) -> DriftReport {
    let mut report = DriftReport::default();

    for entry in profile.enabled_entries() {
        match installed.packages.get(&entry.package_id) {
            None => report.missing.push(entry.package_id.clone()),
            Some(pkg) => {
                let same = SemanticVersion::parse(&pkg.version)
                    .map(|v| v == entry.version)
                    .unwrap_or(false);
                if !same {
                    report.version_mismatches.push(VersionDrift {
                        package_id: entry.package_id.clone(),
                        locked: entry.version.clone(),
                        installed: pkg.version.clone(),
                    });
                }
            }
        }
    }

    for package_id in installed.packages.keys() {
        let tracked = profile
            .entry(package_id)
            .is_some_and(|e| e.enabled);
        if !tracked {
            report.untracked.push(package_id.clone());
        }
    }

    report.missing.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModNode;
    use modlock_core::decision::Strategy;
    use modlock_core::lockfile::{LockEntry, RootRequirement};

    fn graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", SemanticVersion::new(1, 0, 0)))
            .unwrap();
        g
    }

    #[test]
    fn hash_depends_on_every_recorded_input() {
        let g = graph();
        let mut profile = ModProfile::new("p", "t");
        profile.roots = vec![RootRequirement::any("a")];
        let base = source_hash(&g, &profile);
        assert_eq!(base, source_hash(&g, &profile.clone()));
        assert_eq!(base.len(), 64);

        let mut manual = profile.clone();
        manual.strategy = Strategy::Manual;
        assert_ne!(base, source_hash(&g, &manual));

        let mut rootless = profile.clone();
        rootless.roots.clear();
        assert_ne!(base, source_hash(&g, &rootless));

        let mut exact = profile.clone();
        exact.case_insensitive = false;
        assert_ne!(base, source_hash(&g, &exact));

        let mut ordered = profile.clone();
        ordered.priority_order = Some(vec!["a".into()]);
        let with_order = source_hash(&g, &ordered);
        assert_ne!(base, with_order);
        ordered.priority_order = Some(vec!["a".into(), "b".into()]);
        assert_ne!(with_order, source_hash(&g, &ordered));
    }

    #[test]
    fn drift_categories() {
        let mut profile = ModProfile::new("p", "t");
        for (id, enabled) in [("a", true), ("b", true), ("c", true), ("d", false)] {
            profile.entries.push(LockEntry {
                package_id: id.into(),
                version: SemanticVersion::new(1, 0, 0),
                enabled,
                priority: 0,
            });
        }
        let mut installed = InstalledSnapshot::new();
        installed.insert("a", "1.0").insert("b", "2.0").insert("d", "1.0").insert("e", "0.1");

        let report = detect_drift(&profile, &installed);
        assert_eq!(report.missing, vec!["c"]);
        assert_eq!(report.version_mismatches.len(), 1);
        assert_eq!(report.version_mismatches[0].package_id, "b");
        assert_eq!(report.untracked, vec!["d", "e"]);
        assert!(!report.is_clean());
    }
}
