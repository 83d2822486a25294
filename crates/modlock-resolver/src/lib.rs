//! Dependency resolution engine: backtracking version selection with minimal
//! conflict explanations, the file-conflict index, conflict-resolution
//! strategies, and lockfile freshness and drift checks.

pub mod conflict;
pub mod files;
pub mod freshness;
pub mod graph;
pub mod resolver;
pub mod strategy;
