//! Operation: check a lockfile against current metadata and installed state.

use modlock_core::lockfile::{ModProfile, ProfileStore};
use modlock_core::metadata::{InstalledSnapshot, MetadataSource};
use modlock_resolver::freshness::{self, DriftReport, Freshness};
use modlock_resolver::graph::DependencyGraph;
use modlock_util::errors::ModlockResult;

/// Whether the stored lockfile of `name` still matches `source`.
pub fn verify(
    source: &dyn MetadataSource,
    store: &ProfileStore,
    name: &str,
) -> ModlockResult<Freshness> {
    let profile = store.load(name)?;
    let graph = DependencyGraph::from_source(source)?;
    Ok(freshness::validate(&profile, &graph))
}

/// Load the lockfile of `name`, failing if it is stale.
pub fn load_fresh(
    source: &dyn MetadataSource,
    store: &ProfileStore,
    name: &str,
) -> ModlockResult<ModProfile> {
    let profile = store.load(name)?;
    let graph = DependencyGraph::from_source(source)?;
    freshness::ensure_fresh(&profile, &graph)?;
    Ok(profile)
}

/// Compare the lockfile of `name` with what the deployment layer reports.
pub fn verify_installed(
    store: &ProfileStore,
    name: &str,
    installed: &InstalledSnapshot,
) -> ModlockResult<DriftReport> {
    let profile = store.load(name)?;
    let report = freshness::detect_drift(&profile, installed);
    if !report.is_clean() {
        tracing::warn!(
            "Profile '{name}' drifted: {} missing, {} mismatched, {} untracked",
            report.missing.len(),
            report.version_mismatches.len(),
            report.untracked.len()
        );
    }
    Ok(report)
}
