//! Operation: resolve a profile and write its lockfile.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use modlock_core::config::ModlockConfig;
use modlock_core::decision::Strategy;
use modlock_core::lockfile::{LockEntry, LockfileError, ModProfile, ProfileStore, RootRequirement};
use modlock_core::metadata::MetadataSource;
use modlock_core::version::SemanticVersion;
use modlock_resolver::conflict::ResolutionConflict;
use modlock_resolver::files::FileConflictIndex;
use modlock_resolver::freshness::source_hash;
use modlock_resolver::graph::DependencyGraph;
use modlock_resolver::resolver::{ResolutionResult, Resolver};
use modlock_resolver::strategy::ResolutionPlan;
use modlock_util::errors::ModlockResult;

/// Inputs of one `lock` run.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub profile_name: String,
    pub target_id: String,
    pub roots: Vec<RootRequirement>,
    pub strategy: Strategy,
    pub visit_budget: u64,
    pub case_insensitive: bool,
    /// Later entries outrank earlier ones. Defaults to install order.
    pub priority_order: Option<Vec<String>>,
    /// Prefer the versions recorded by an existing lockfile of this profile.
    pub keep_locked: bool,
}

impl LockRequest {
    pub fn new(
        profile_name: impl Into<String>,
        target_id: impl Into<String>,
        roots: Vec<RootRequirement>,
    ) -> Self {
        Self::from_config(&ModlockConfig::default(), profile_name, target_id, roots)
    }

    /// A request using the configured budget, strategy and path folding.
    pub fn from_config(
        config: &ModlockConfig,
        profile_name: impl Into<String>,
        target_id: impl Into<String>,
        roots: Vec<RootRequirement>,
    ) -> Self {
        Self {
            profile_name: profile_name.into(),
            target_id: target_id.into(),
            roots,
            strategy: config.conflicts.strategy,
            visit_budget: config.resolver.visit_budget,
            case_insensitive: config.index.case_insensitive,
            priority_order: None,
            keep_locked: true,
        }
    }
}

/// Result of a `lock` run.
#[derive(Debug)]
pub enum LockOutcome {
    /// The profile was resolved and its lockfile written to `path`.
    Locked {
        profile: ModProfile,
        path: PathBuf,
        plan: ResolutionPlan,
    },
    /// Resolution failed; nothing was written.
    Conflict(ResolutionConflict),
}

impl LockOutcome {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockOutcome::Locked { .. })
    }
}

/// Resolve `request` against `source` and save the lockfile into `store`.
pub fn lock(
    source: &dyn MetadataSource,
    request: &LockRequest,
    store: &ProfileStore,
) -> ModlockResult<LockOutcome> {
    lock_cancellable(source, request, store, None)
}

/// [`lock`], stopping early once `cancel` is raised.
pub fn lock_cancellable(
    source: &dyn MetadataSource,
    request: &LockRequest,
    store: &ProfileStore,
    cancel: Option<&AtomicBool>,
) -> ModlockResult<LockOutcome> {
    let graph = DependencyGraph::from_source(source)?;
    let pinned = if request.keep_locked {
        locked_versions(store, &request.profile_name)
    } else {
        BTreeMap::new()
    };

    let mut resolver = Resolver::new(&graph)
        .roots(request.roots.iter().cloned())
        .pinned(pinned)
        .visit_budget(request.visit_budget);
    if let Some(flag) = cancel {
        resolver = resolver.cancel_flag(flag);
    }

    let selection = match resolver.resolve() {
        ResolutionResult::Resolved(selection) => selection,
        ResolutionResult::Conflict(conflict) => {
            tracing::warn!(
                "Profile '{}' could not be resolved: {conflict}",
                request.profile_name
            );
            return Ok(LockOutcome::Conflict(conflict));
        }
    };

    let index = FileConflictIndex::from_selection(&graph, &selection, request.case_insensitive)?;
    let priority = request
        .priority_order
        .clone()
        .unwrap_or_else(|| selection.order().to_vec());
    let plan = ResolutionPlan::new(&index.conflicts(), request.strategy, &priority);

    let mut profile = ModProfile::new(&request.profile_name, &request.target_id);
    profile.strategy = request.strategy;
    profile.roots = request.roots.clone();
    profile.case_insensitive = request.case_insensitive;
    profile.priority_order = request.priority_order.clone();
    profile.source_hash = source_hash(&graph, &profile);
    // Same ranking the conflict winners were picked with; unlisted packages rank lowest.
    profile.entries = selection
        .in_order()
        .map(|node| LockEntry {
            package_id: node.package_id().to_string(),
            version: node.version().clone(),
            enabled: true,
            priority: priority
                .iter()
                .position(|p| p == node.package_id())
                .map_or(-1, |i| i as i64),
        })
        .collect();
    profile.file_conflict_decisions = plan.decisions();

    let path = store.save(&profile)?;
    let pending = plan.pending().count();
    if pending > 0 {
        tracing::info!("{pending} file conflict(s) need a decision");
    }
    Ok(LockOutcome::Locked {
        profile,
        path,
        plan,
    })
}

/// Write the (possibly user-edited) decisions of `plan` into `profile` and save it.
pub fn save_plan(
    store: &ProfileStore,
    profile: &mut ModProfile,
    plan: &ResolutionPlan,
) -> ModlockResult<PathBuf> {
    profile.file_conflict_decisions = plan.decisions();
    Ok(store.save(profile)?)
}

fn locked_versions(store: &ProfileStore, name: &str) -> BTreeMap<String, SemanticVersion> {
    match store.load(name) {
        Ok(profile) => profile.pinned_versions(),
        Err(LockfileError::NotFound { .. }) => BTreeMap::new(),
        Err(e) => {
            tracing::warn!("Ignoring existing lockfile: {e}");
            BTreeMap::new()
        }
    }
}
