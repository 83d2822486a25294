//! High-level operations: lock a profile, verify it, and show its tree.

pub mod ops_lock;
pub mod ops_tree;
pub mod ops_verify;

use modlock_core::config::ModlockConfig;
use modlock_core::lockfile::ProfileStore;

/// The profile store in the configured directory.
pub fn profile_store(config: &ModlockConfig) -> ProfileStore {
    ProfileStore::new(config.profile_dir())
}
