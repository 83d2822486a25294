//! Operation: display the locked dependency tree.

use std::collections::BTreeMap;

use modlock_core::lockfile::{ModProfile, ProfileStore};
use modlock_core::metadata::{DependencyKind, MetadataSource};
use modlock_resolver::graph::{DependencyGraph, NodeId};
use modlock_util::errors::{ModlockError, ModlockResult};

/// Render the locked packages of `name` as a tree rooted at its requirements.
pub fn tree(source: &dyn MetadataSource, store: &ProfileStore, name: &str) -> ModlockResult<String> {
    let profile = store.load(name)?;
    let graph = DependencyGraph::from_source(source)?;
    let selected = locked_nodes(&graph, &profile)?;

    let mut roots: Vec<String> = Vec::new();
    for root in &profile.roots {
        if !roots.contains(&root.package_id) {
            roots.push(root.package_id.clone());
        }
    }
    Ok(graph.print_tree(&selected, &roots))
}

/// Locked packages with a Required or Optional edge to `package_id`, one line each.
pub fn why(
    source: &dyn MetadataSource,
    store: &ProfileStore,
    name: &str,
    package_id: &str,
) -> ModlockResult<Vec<String>> {
    let profile = store.load(name)?;
    let graph = DependencyGraph::from_source(source)?;
    let selected = locked_nodes(&graph, &profile)?;

    let mut lines = Vec::new();
    if profile.roots.iter().any(|r| r.package_id == package_id) {
        lines.push(format!("root requires {package_id}"));
    }
    for &node in selected.values() {
        for (_, edge) in graph.edges_from(node) {
            let relevant = matches!(edge.kind, DependencyKind::Required | DependencyKind::Optional);
            if relevant && edge.to == package_id {
                lines.push(format!(
                    "{} {} {package_id} {}",
                    graph.node(node),
                    edge.kind,
                    edge.constraint
                ));
            }
        }
    }
    lines.sort();
    lines.dedup();
    Ok(lines)
}

fn locked_nodes(
    graph: &DependencyGraph,
    profile: &ModProfile,
) -> Result<BTreeMap<String, NodeId>, ModlockError> {
    profile
        .enabled_entries()
        .map(|entry| {
            graph
                .find(&entry.package_id, &entry.version)
                .map(|id| (entry.package_id.clone(), id))
                .ok_or_else(|| ModlockError::Lockfile {
                    message: format!(
                        "Locked package {}@{} is no longer available",
                        entry.package_id, entry.version
                    ),
                })
        })
        .collect()
}
