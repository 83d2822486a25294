//! Dependency graph construction and traversal.
//!
//! Nodes are package *versions* stored in an arena and addressed by
//! [`NodeId`]. Edges point from a node (or from every version of a package)
//! to a package id plus a version constraint; which version satisfies the
//! constraint is the resolver's business, not the graph's.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use miette::Diagnostic;
use modlock_core::metadata::{DependencyKind, MetadataSource};
use modlock_core::version::{ParseError, SemanticVersion, VersionRange};
use modlock_util::errors::ModlockError;
use modlock_util::hash::FieldHasher;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

/// Stable index of a [`ModNode`] inside one [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable index of a [`DependencyEdge`] inside one [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One package at one specific version, with the files it ships.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModNode {
    package_id: String,
    version: SemanticVersion,
    /// Relative path → content hash.
    files: BTreeMap<String, String>,
}

impl ModNode {
    pub fn new(package_id: impl Into<String>, version: SemanticVersion) -> Self {
        Self {
            package_id: package_id.into(),
            version,
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, hash: impl Into<String>) -> Self {
        self.files.insert(path.into(), hash.into());
        self
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn version(&self) -> &SemanticVersion {
        &self.version
    }

    /// Provided files as `(path, content hash)`.
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn provides(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

impl fmt::Display for ModNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package_id, self.version)
    }
}

/// Where an edge is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeSource {
    /// Declared by one specific version.
    Node(NodeId),
    /// Applies to every version of the package.
    Package(String),
}

/// Typed, directed relation from a package version to a package id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: EdgeSource,
    pub to: String,
    pub constraint: VersionRange,
    pub kind: DependencyKind,
}

/// Errors raised while building a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("Duplicate node {package_id}@{version}")]
    DuplicateNode {
        package_id: String,
        version: SemanticVersion,
    },

    #[error("{from} depends on unknown package '{package_id}'")]
    #[diagnostic(help("No version of this package is available from the metadata source"))]
    UnknownPackage { from: String, package_id: String },

    #[error("Edge source {index} is not a node of this graph")]
    UnknownNode { index: usize },

    #[error("Invalid version '{version}' for package '{package_id}'")]
    InvalidVersion {
        package_id: String,
        version: String,
        #[source]
        #[diagnostic_source]
        source: ParseError,
    },

    #[error("Invalid constraint on '{package_id}' declared by {from}")]
    InvalidConstraint {
        from: String,
        package_id: String,
        #[source]
        #[diagnostic_source]
        source: ParseError,
    },
}

impl From<GraphError> for ModlockError {
    fn from(e: GraphError) -> Self {
        match &e {
            GraphError::InvalidVersion { source, .. }
            | GraphError::InvalidConstraint { source, .. } => ModlockError::Parse {
                message: format!("{e}: {source}"),
            },
            _ => ModlockError::Graph {
                message: e.to_string(),
            },
        }
    }
}

/// A required-edge loop, as the ordered list of package ids on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cycle {
    pub packages: Vec<String>,
}

impl Cycle {
    pub fn contains(&self, package_id: &str) -> bool {
        self.packages.iter().any(|p| p == package_id)
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.packages {
            write!(f, "{p} -> ")?;
        }
        match self.packages.first() {
            Some(first) => write!(f, "{first}"),
            None => Ok(()),
        }
    }
}

/// Ordering is impossible because required edges form a loop.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("Dependency cycle: {cycle}")]
#[diagnostic(help("Required dependencies may not form a loop; make one of the edges optional"))]
pub struct CycleError {
    pub cycle: Cycle,
}

/// Every available package version and the edges between them, for one resolution run.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ModNode>,
    edges: Vec<DependencyEdge>,
    /// Candidate versions per package, newest first.
    candidates: BTreeMap<String, Vec<NodeId>>,
    /// Edges declared by each node.
    node_edges: Vec<Vec<EdgeId>>,
    /// Edges declared for every version of a package.
    package_edges: BTreeMap<String, Vec<EdgeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from every release a metadata source offers.
    ///
    /// All nodes are added before any edge so edge targets are checked
    /// against the complete package list.
    pub fn from_source(source: &dyn MetadataSource) -> Result<Self, ModlockError> {
        let mut graph = Self::new();
        let mut pending = Vec::new();

        for package_id in source.package_ids() {
            for release in source.releases(&package_id)? {
                let version = SemanticVersion::parse(&release.version).map_err(|source| {
                    GraphError::InvalidVersion {
                        package_id: release.package_id.clone(),
                        version: release.version.clone(),
                        source,
                    }
                })?;
                let mut node = ModNode::new(release.package_id.clone(), version);
                for file in &release.files {
                    node.files.insert(file.path.clone(), file.hash.clone());
                }
                let id = graph.add_node(node)?;
                pending.push((id, release.dependencies));
            }
        }

        for (id, deps) in pending {
            for dep in deps {
                let constraint = VersionRange::parse(&dep.range).map_err(|source| {
                    GraphError::InvalidConstraint {
                        from: graph.node(id).to_string(),
                        package_id: dep.package_id.clone(),
                        source,
                    }
                })?;
                graph.add_edge(DependencyEdge {
                    from: EdgeSource::Node(id),
                    to: dep.package_id,
                    constraint,
                    kind: dep.kind,
                })?;
            }
        }

        tracing::debug!(
            "Built dependency graph: {} packages, {} nodes, {} edges",
            graph.package_count(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Add a package version. Fails if the same `(package, version)` exists.
    pub fn add_node(&mut self, node: ModNode) -> Result<NodeId, GraphError> {
        if self.find(&node.package_id, &node.version).is_some() {
            return Err(GraphError::DuplicateNode {
                package_id: node.package_id,
                version: node.version,
            });
        }
        let id = NodeId(self.nodes.len() as u32);
        let list = self.candidates.entry(node.package_id.clone()).or_default();
        let at = list
            .iter()
            .position(|other| self.nodes[other.index()].version < node.version)
            .unwrap_or(list.len());
        list.insert(at, id);
        self.nodes.push(node);
        self.node_edges.push(Vec::new());
        Ok(id)
    }

    /// Add an edge. Fails if the target package has no candidate versions at all;
    /// whether any *matching* version exists is decided during resolution.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<EdgeId, GraphError> {
        let from_label = match &edge.from {
            EdgeSource::Node(id) => match self.nodes.get(id.index()) {
                Some(node) => node.to_string(),
                None => return Err(GraphError::UnknownNode { index: id.index() }),
            },
            EdgeSource::Package(p) => {
                let label = format!("{p}@*");
                if !self.candidates.contains_key(p) {
                    return Err(GraphError::UnknownPackage {
                        from: label,
                        package_id: p.clone(),
                    });
                }
                label
            }
        };
        if !self.candidates.contains_key(&edge.to) {
            return Err(GraphError::UnknownPackage {
                from: from_label,
                package_id: edge.to,
            });
        }

        let id = EdgeId(self.edges.len() as u32);
        match &edge.from {
            EdgeSource::Node(n) => self.node_edges[n.index()].push(id),
            EdgeSource::Package(p) => self.package_edges.entry(p.clone()).or_default().push(id),
        }
        self.edges.push(edge);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &ModNode {
        &self.nodes[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &DependencyEdge {
        &self.edges[id.index()]
    }

    /// All nodes with their ids, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ModNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// All edges with their ids, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &DependencyEdge)> {
        self.edges
            .iter()
            .enumerate()
            .map(|(i, e)| (EdgeId(i as u32), e))
    }

    /// Candidate versions of a package, newest first. Empty for unknown packages.
    pub fn candidates(&self, package_id: &str) -> &[NodeId] {
        self.candidates
            .get(package_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Known package ids in lexicographic order.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.candidates.keys().map(String::as_str)
    }

    pub fn contains_package(&self, package_id: &str) -> bool {
        self.candidates.contains_key(package_id)
    }

    /// Look up a node by `(package, version)`.
    pub fn find(&self, package_id: &str, version: &SemanticVersion) -> Option<NodeId> {
        self.candidates(package_id)
            .iter()
            .copied()
            .find(|id| self.nodes[id.index()].version == *version)
    }

    /// Edges that apply to `node`: its own plus those declared for its whole package.
    pub fn edges_from(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &DependencyEdge)> {
        let package = &self.nodes[node.index()].package_id;
        let shared = self
            .package_edges
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        self.node_edges[node.index()]
            .iter()
            .chain(shared.iter())
            .map(|&id| (id, &self.edges[id.index()]))
    }

    /// Reverse lookup: edges pointing at `package_id`.
    pub fn dependents_of(&self, package_id: &str) -> Vec<(EdgeId, &DependencyEdge)> {
        self.edges().filter(|(_, e)| e.to == package_id).collect()
    }

    /// Human-readable label for an edge's declaring side.
    pub fn source_label(&self, source: &EdgeSource) -> String {
        match source {
            EdgeSource::Node(id) => self.node(*id).to_string(),
            EdgeSource::Package(p) => format!("{p}@*"),
        }
    }

    /// Find cycles among edges of the given kinds.
    ///
    /// Three-colour depth-first search over the package-level projection of the
    /// graph; every back edge reports one cycle, reconstructed from the DFS
    /// stack. Packages and successors are visited in lexicographic order.
    pub fn detect_cycles(&self, kinds: &[DependencyKind]) -> Vec<Cycle> {
        let (projection, names) = self.package_projection(kinds);

        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let successors = |n: NodeIndex| -> Vec<NodeIndex> {
            let mut next: Vec<NodeIndex> = projection.neighbors(n).collect();
            next.sort();
            next.dedup();
            next
        };

        let mut color = vec![Color::White; projection.node_count()];
        let mut cycles = Vec::new();

        for start in projection.node_indices() {
            if color[start.index()] != Color::White {
                continue;
            }
            // Explicit stack of (node, its successors, next successor to visit).
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            color[start.index()] = Color::Gray;
            stack.push((start, successors(start), 0));

            while let Some(top) = stack.last_mut() {
                let (node, next, pos) = (top.0, &top.1, top.2);
                if pos >= next.len() {
                    color[node.index()] = Color::Black;
                    stack.pop();
                    continue;
                }
                let succ = next[pos];
                top.2 += 1;

                match color[succ.index()] {
                    Color::White => {
                        color[succ.index()] = Color::Gray;
                        let succ_next = successors(succ);
                        stack.push((succ, succ_next, 0));
                    }
                    Color::Gray => {
                        let from = stack
                            .iter()
                            .position(|(n, _, _)| *n == succ)
                            .unwrap_or(0);
                        let packages = stack[from..]
                            .iter()
                            .map(|(n, _, _)| names[n.index()].clone())
                            .collect();
                        cycles.push(Cycle { packages });
                    }
                    Color::Black => {}
                }
            }
        }
        cycles
    }

    /// Package-level projection: one petgraph node per package, one edge per
    /// distinct `(from package, to package)` pair among edges of `kinds`.
    /// Node indices follow lexicographic package order.
    fn package_projection(&self, kinds: &[DependencyKind]) -> (DiGraph<(), ()>, Vec<String>) {
        let mut projection = DiGraph::new();
        let mut index = BTreeMap::new();
        let mut names = Vec::new();
        for package in self.candidates.keys() {
            index.insert(package.as_str(), projection.add_node(()));
            names.push(package.clone());
        }

        for edge in &self.edges {
            if !kinds.contains(&edge.kind) {
                continue;
            }
            let from = match &edge.from {
                EdgeSource::Node(id) => self.nodes[id.index()].package_id.as_str(),
                EdgeSource::Package(p) => p.as_str(),
            };
            if let (Some(&a), Some(&b)) = (index.get(from), index.get(edge.to.as_str())) {
                projection.update_edge(a, b, ());
            }
        }
        (projection, names)
    }

    /// Install/load order of a selected set, dependencies first.
    ///
    /// Kahn's algorithm over the Required and Optional edges among the selected
    /// nodes only, always releasing the lexicographically smallest ready
    /// package. Optional edges that would block progress are dropped (optional
    /// loops are allowed); a blocked Required loop is a [`CycleError`].
    pub fn topological_order(
        &self,
        selected: &BTreeMap<String, NodeId>,
    ) -> Result<Vec<String>, CycleError> {
        let deps = self.selected_dependencies(selected);

        let mut required_left: BTreeMap<&str, usize> = BTreeMap::new();
        let mut optional_left: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<(&str, bool)>> = BTreeMap::new();
        for (package, list) in &deps {
            required_left.insert(package.as_str(), list.iter().filter(|(_, req)| *req).count());
            optional_left.insert(package.as_str(), list.iter().filter(|(_, req)| !*req).count());
            for (dep, required) in list {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push((package.as_str(), *required));
            }
        }

        let mut ready: BTreeSet<&str> = deps
            .keys()
            .filter(|p| required_left[p.as_str()] == 0 && optional_left[p.as_str()] == 0)
            .map(|p| p.as_str())
            .collect();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(deps.len());

        while order.len() < deps.len() {
            let next = match ready.pop_first() {
                Some(p) => p,
                None => {
                    // Only optional edges may be broken to make progress.
                    let released = deps
                        .keys()
                        .map(String::as_str)
                        .find(|p| !emitted.contains(p) && required_left[p] == 0);
                    match released {
                        Some(p) => {
                            tracing::debug!("Breaking optional dependency loop at '{p}'");
                            p
                        }
                        None => {
                            return Err(CycleError {
                                cycle: required_cycle(&deps, &emitted),
                            })
                        }
                    }
                }
            };

            emitted.insert(next);
            order.push(next.to_string());
            if let Some(list) = dependents.get(next) {
                for &(dependent, required) in list {
                    if emitted.contains(dependent) {
                        continue;
                    }
                    let counter = if required {
                        required_left.get_mut(dependent)
                    } else {
                        optional_left.get_mut(dependent)
                    };
                    if let Some(c) = counter {
                        *c = c.saturating_sub(1);
                    }
                    if required_left[dependent] == 0 && optional_left[dependent] == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        Ok(order)
    }

    /// For each selected package, its distinct selected dependencies and
    /// whether the relation is required (`true`) or optional.
    fn selected_dependencies(
        &self,
        selected: &BTreeMap<String, NodeId>,
    ) -> BTreeMap<String, Vec<(String, bool)>> {
        let mut deps = BTreeMap::new();
        for (package, &node) in selected {
            let mut list: BTreeMap<String, bool> = BTreeMap::new();
            for (_, edge) in self.edges_from(node) {
                let Some(&target) = selected.get(&edge.to) else {
                    continue;
                };
                match edge.kind {
                    DependencyKind::Required => {
                        list.insert(edge.to.clone(), true);
                    }
                    DependencyKind::Optional
                        if edge.constraint.matches(self.node(target).version()) =>
                    {
                        list.entry(edge.to.clone()).or_insert(false);
                    }
                    _ => {}
                }
            }
            deps.insert(package.clone(), list.into_iter().collect());
        }
        deps
    }

    /// Render a selected set as a dependency tree starting from `roots`.
    pub fn print_tree(&self, selected: &BTreeMap<String, NodeId>, roots: &[String]) -> String {
        let deps = self.selected_dependencies(selected);
        let mut output = String::new();
        let mut visited = HashSet::new();
        let count = roots.len();
        for (i, root) in roots.iter().enumerate() {
            if !selected.contains_key(root) {
                continue;
            }
            self.print_subtree(
                &mut output,
                selected,
                &deps,
                (root.as_str(), true),
                "",
                i == count - 1,
                &mut visited,
            );
        }
        output
    }

    #[allow(clippy::too_many_arguments)]
    fn print_subtree(
        &self,
        output: &mut String,
        selected: &BTreeMap<String, NodeId>,
        deps: &BTreeMap<String, Vec<(String, bool)>>,
        (package, required): (&str, bool),
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<String>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = self.node(selected[package]);
        let marker = if required { "" } else { " (optional)" };
        output.push_str(&format!("{prefix}{connector}{node}{marker}\n"));

        if !visited.insert(package.to_string()) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let children = deps.get(package).map(Vec::as_slice).unwrap_or(&[]);
        let count = children.len();
        for (i, (child, req)) in children.iter().enumerate() {
            self.print_subtree(
                output,
                selected,
                deps,
                (child.as_str(), *req),
                &child_prefix,
                i == count - 1,
                visited,
            );
        }

        visited.remove(package);
    }

    /// Feed a canonical rendering of the graph into `hasher`; independent of
    /// insertion order.
    pub fn fingerprint(&self, hasher: &mut FieldHasher) {
        for ids in self.candidates.values() {
            let mut ids = ids.clone();
            ids.reverse();
            for id in ids {
                let node = &self.nodes[id.index()];
                hasher.field("node").field(&node.to_string());
                // Build metadata is not part of version identity but it is part of the input.
                hasher.field(node.version.build_metadata().unwrap_or(""));
                for (path, hash) in &node.files {
                    hasher.field(path).field(hash);
                }
            }
        }

        let mut rendered: Vec<String> = self
            .edges
            .iter()
            .map(|e| {
                format!(
                    "{}|{:?}|{}|{}",
                    self.source_label(&e.from),
                    e.kind,
                    e.to,
                    e.constraint
                )
            })
            .collect();
        rendered.sort();
        for edge in &rendered {
            hasher.field("edge").field(edge);
        }
    }

    pub fn package_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Walk required edges among the packages not yet emitted until one repeats.
fn required_cycle(deps: &BTreeMap<String, Vec<(String, bool)>>, emitted: &HashSet<&str>) -> Cycle {
    let start = deps
        .keys()
        .find(|p| !emitted.contains(p.as_str()))
        .cloned()
        .unwrap_or_default();
    let mut path: Vec<String> = Vec::new();
    let mut current = start;
    loop {
        if let Some(at) = path.iter().position(|p| *p == current) {
            return Cycle {
                packages: path.split_off(at),
            };
        }
        path.push(current.clone());
        let next = deps.get(&current).and_then(|list| {
            list.iter()
                .find(|(dep, req)| *req && !emitted.contains(dep.as_str()))
                .map(|(dep, _)| dep.clone())
        });
        match next {
            Some(n) => current = n,
            None => return Cycle { packages: path },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap()
    }

    fn edge(from: NodeId, to: &str, range: &str, kind: DependencyKind) -> DependencyEdge {
        DependencyEdge {
            from: EdgeSource::Node(from),
            to: to.to_string(),
            constraint: VersionRange::parse(range).unwrap(),
            kind,
        }
    }

    #[test]
    fn add_and_find() {
        let mut g = DependencyGraph::new();
        let id = g.add_node(ModNode::new("skyui", v("5.2"))).unwrap();
        assert_eq!(g.find("skyui", &v("5.2.0")), Some(id));
        assert_eq!(g.node(id).version(), &v("5.2.0"));
        assert!(g.find("skyui", &v("5.1")).is_none());
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let err = g.add_node(ModNode::new("a", v("1.0.0+rebuild"))).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[test]
    fn candidates_sorted_newest_first() {
        let mut g = DependencyGraph::new();
        for ver in ["1.0", "3.0", "2.0", "2.0.0-beta"] {
            g.add_node(ModNode::new("a", v(ver))).unwrap();
        }
        let versions: Vec<String> = g
            .candidates("a")
            .iter()
            .map(|id| g.node(*id).version().to_string())
            .collect();
        assert_eq!(versions, vec!["3.0.0", "2.0.0", "2.0.0-beta", "1.0.0"]);
    }

    #[test]
    fn edge_to_unknown_package_rejected() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let err = g
            .add_edge(edge(a, "ghost", "*", DependencyKind::Required))
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownPackage { .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn package_edge_errors_name_the_declaring_package() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let err = g
            .add_edge(DependencyEdge {
                from: EdgeSource::Package("ghost".into()),
                to: "a".into(),
                constraint: VersionRange::any(),
                kind: DependencyKind::Required,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "ghost@* depends on unknown package 'ghost'");

        let err = g
            .add_edge(DependencyEdge {
                from: EdgeSource::Package("a".into()),
                to: "missing".into(),
                constraint: VersionRange::any(),
                kind: DependencyKind::Incompatible,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "a@* depends on unknown package 'missing'");
    }

    #[test]
    fn edge_with_unmatched_range_is_accepted() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        g.add_node(ModNode::new("b", v("1.0"))).unwrap();
        assert!(g
            .add_edge(edge(a, "b", ">=9.0", DependencyKind::Required))
            .is_ok());
    }

    #[test]
    fn package_edges_apply_to_every_version() {
        let mut g = DependencyGraph::new();
        let a1 = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let a2 = g.add_node(ModNode::new("a", v("2.0"))).unwrap();
        g.add_node(ModNode::new("b", v("1.0"))).unwrap();
        g.add_edge(DependencyEdge {
            from: EdgeSource::Package("a".into()),
            to: "b".into(),
            constraint: VersionRange::any(),
            kind: DependencyKind::Required,
        })
        .unwrap();
        assert_eq!(g.edges_from(a1).count(), 1);
        assert_eq!(g.edges_from(a2).count(), 1);
        assert_eq!(g.dependents_of("b").len(), 1);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        g.add_edge(edge(a, "a", "*", DependencyKind::Required)).unwrap();
        let cycles = g.detect_cycles(&[DependencyKind::Required]);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].packages, vec!["a"]);
        assert_eq!(cycles[0].to_string(), "a -> a");
    }

    #[test]
    fn topological_order_dependencies_first() {
        let mut g = DependencyGraph::new();
        let app = g.add_node(ModNode::new("app", v("1.0"))).unwrap();
        let lib = g.add_node(ModNode::new("lib", v("1.0"))).unwrap();
        let base = g.add_node(ModNode::new("base", v("1.0"))).unwrap();
        g.add_edge(edge(app, "lib", "*", DependencyKind::Required)).unwrap();
        g.add_edge(edge(lib, "base", "*", DependencyKind::Required)).unwrap();

        let selected: BTreeMap<String, NodeId> = [
            ("app".to_string(), app),
            ("lib".to_string(), lib),
            ("base".to_string(), base),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            g.topological_order(&selected).unwrap(),
            vec!["base", "lib", "app"]
        );
    }

    #[test]
    fn tree_printing() {
        let mut g = DependencyGraph::new();
        let app = g.add_node(ModNode::new("app", v("1.0"))).unwrap();
        let a = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let b = g.add_node(ModNode::new("b", v("2.0"))).unwrap();
        g.add_edge(edge(app, "a", "*", DependencyKind::Required)).unwrap();
        g.add_edge(edge(app, "b", "*", DependencyKind::Optional)).unwrap();
        g.add_edge(edge(a, "b", "*", DependencyKind::Required)).unwrap();

        let selected: BTreeMap<String, NodeId> =
            [("app".to_string(), app), ("a".to_string(), a), ("b".to_string(), b)]
                .into_iter()
                .collect();
        let tree = g.print_tree(&selected, &["app".to_string()]);
        assert!(tree.starts_with("└── app@1.0.0\n"), "{tree}");
        assert!(tree.contains("    ├── a@1.0.0\n"), "{tree}");
        assert!(tree.contains("    │   └── b@2.0.0\n"), "{tree}");
        assert!(tree.contains("    └── b@2.0.0 (optional)\n"), "{tree}");
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let build = |order: &[&str]| {
            let mut g = DependencyGraph::new();
            for ver in order {
                g.add_node(ModNode::new("a", v(ver)).with_file("x.esp", "h"))
                    .unwrap();
            }
            let mut h = FieldHasher::new();
            g.fingerprint(&mut h);
            h.finish()
        };
        assert_eq!(build(&["1.0", "2.0"]), build(&["2.0", "1.0"]));
        assert_ne!(build(&["1.0", "2.0"]), build(&["1.0"]));
    }
}
