//! Backtracking version selection.
//!
//! The search picks the most constrained unassigned package first (fewest
//! candidates left, ties broken by package id), tries its candidates from a
//! pinned version then newest to oldest, and propagates every Required and
//! Incompatible edge of a chosen node into the candidate lists of the packages
//! it touches. An empty list fails the branch immediately. The deepest failure
//! seen is kept and reduced to the smallest set of clashing constraints, which
//! becomes the conflict explanation when the search is exhausted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use modlock_core::config::DEFAULT_VISIT_BUDGET;
use modlock_core::lockfile::RootRequirement;
use modlock_core::metadata::DependencyKind;
use modlock_core::version::{SemanticVersion, VersionRange};

use crate::conflict::{ConflictKind, ExplanationStep, ResolutionConflict};
use crate::graph::{DependencyGraph, EdgeId, ModNode, NodeId};

/// One version per needed package, plus its install order.
#[derive(Debug, Clone)]
pub struct Selection {
    ids: BTreeMap<String, NodeId>,
    selected: BTreeMap<String, ModNode>,
    order: Vec<String>,
    visits: u64,
}

impl Selection {
    pub fn get(&self, package_id: &str) -> Option<&ModNode> {
        self.selected.get(package_id)
    }

    pub fn node_id(&self, package_id: &str) -> Option<NodeId> {
        self.ids.get(package_id).copied()
    }

    pub fn contains(&self, package_id: &str) -> bool {
        self.selected.contains_key(package_id)
    }

    /// Selected node per package id.
    pub fn selected(&self) -> &BTreeMap<String, ModNode> {
        &self.selected
    }

    /// Selected graph node id per package id.
    pub fn ids(&self) -> &BTreeMap<String, NodeId> {
        &self.ids
    }

    /// Install order, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Selected nodes in install order.
    pub fn in_order(&self) -> impl Iterator<Item = &ModNode> {
        self.order.iter().filter_map(|p| self.selected.get(p))
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Candidate visits the search needed.
    pub fn visits(&self) -> u64 {
        self.visits
    }
}

/// Outcome of [`Resolver::resolve`].
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Resolved(Selection),
    Conflict(ResolutionConflict),
}

impl ResolutionResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionResult::Resolved(_))
    }

    pub fn selection(&self) -> Option<&Selection> {
        match self {
            ResolutionResult::Resolved(s) => Some(s),
            ResolutionResult::Conflict(_) => None,
        }
    }

    pub fn conflict(&self) -> Option<&ResolutionConflict> {
        match self {
            ResolutionResult::Resolved(_) => None,
            ResolutionResult::Conflict(c) => Some(c),
        }
    }

    pub fn into_result(self) -> Result<Selection, ResolutionConflict> {
        match self {
            ResolutionResult::Resolved(s) => Ok(s),
            ResolutionResult::Conflict(c) => Err(c),
        }
    }
}

/// Resolves root requirements against a [`DependencyGraph`].
///
/// ```ignore
/// let result = Resolver::new(&graph)
///     .roots(profile.roots.clone())
///     .pinned(profile.pinned_versions())
///     .resolve();
/// ```
pub struct Resolver<'a> {
    graph: &'a DependencyGraph,
    roots: Vec<RootRequirement>,
    pinned: BTreeMap<String, SemanticVersion>,
    budget: u64,
    cancel: Option<&'a AtomicBool>,
}

/// Where a constraint on a package came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Root(usize),
    /// An edge, with the selected node it was applied for.
    Edge(EdgeId, NodeId),
}

/// Search state, cloned at every choice point.
#[derive(Debug, Clone, Default)]
struct State {
    assigned: BTreeMap<String, NodeId>,
    /// Remaining candidates of activated, unassigned packages.
    domains: BTreeMap<String, Vec<NodeId>>,
    /// Every constraint applied to a package so far.
    imposed: BTreeMap<String, Vec<Origin>>,
    depth: usize,
}

enum Stop {
    Exhausted,
    Budget,
    Cancelled,
}

struct Failure {
    package_id: String,
    depth: usize,
    /// The culprits clash on their own, independent of earlier choices.
    genuine: bool,
    culprits: Vec<Origin>,
    /// Already selected version the culprits rejected.
    rejected: Option<NodeId>,
    assigned: BTreeMap<String, NodeId>,
}

#[derive(Default)]
struct Search {
    visits: u64,
    deepest: Option<Failure>,
}

/// How a package was reached during explanation path search.
enum Via {
    Root(usize),
    Edge(EdgeId, String),
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self {
            graph,
            roots: Vec::new(),
            pinned: BTreeMap::new(),
            budget: DEFAULT_VISIT_BUDGET,
            cancel: None,
        }
    }

    pub fn root(mut self, requirement: RootRequirement) -> Self {
        self.roots.push(requirement);
        self
    }

    pub fn roots(mut self, roots: impl IntoIterator<Item = RootRequirement>) -> Self {
        self.roots.extend(roots);
        self
    }

    /// Versions to try first when still compatible, usually from an existing lockfile.
    pub fn pinned(mut self, pinned: BTreeMap<String, SemanticVersion>) -> Self {
        self.pinned = pinned;
        self
    }

    /// Maximum number of candidate visits before giving up with a timeout.
    pub fn visit_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// Flag polled at every choice point; raising it stops the search.
    pub fn cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run the search.
    pub fn resolve(&self) -> ResolutionResult {
        tracing::info!(
            "Resolving {} root requirement(s) over {} package(s)",
            self.roots.len(),
            self.graph.package_count()
        );

        let mut state = State::default();
        let mut search = Search::default();

        for (i, root) in self.roots.iter().enumerate() {
            if !self.graph.contains_package(&root.package_id) {
                tracing::warn!("Root package '{}' is not available", root.package_id);
                let mut conflict = ResolutionConflict::new(ConflictKind::MissingPackage);
                conflict.package_id = Some(root.package_id.clone());
                conflict.derivations = vec![vec![self.root_step(i)]];
                return ResolutionResult::Conflict(conflict);
            }
            if !self.impose(&mut state, &root.package_id, Origin::Root(i), &mut search) {
                return ResolutionResult::Conflict(self.explain(search.deepest.as_ref()));
            }
        }

        match self.search(&state, &mut search) {
            Ok(solution) => self.finish(solution, search.visits),
            Err(Stop::Exhausted) => {
                let conflict = self.explain(search.deepest.as_ref());
                tracing::warn!("Resolution failed after {} visits", search.visits);
                ResolutionResult::Conflict(conflict)
            }
            Err(Stop::Budget) => {
                tracing::warn!("Resolution budget of {} visits exhausted", self.budget);
                let mut conflict = self.explain(search.deepest.as_ref());
                conflict.kind = ConflictKind::Timeout {
                    visits: search.visits.min(self.budget),
                    budget: self.budget,
                };
                ResolutionResult::Conflict(conflict)
            }
            Err(Stop::Cancelled) => {
                tracing::info!("Resolution cancelled after {} visits", search.visits);
                ResolutionResult::Conflict(ResolutionConflict::new(ConflictKind::Cancelled))
            }
        }
    }

    fn search(&self, state: &State, search: &mut Search) -> Result<State, Stop> {
        if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(Stop::Cancelled);
        }

        let Some(package) = state
            .domains
            .iter()
            .min_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.0.cmp(b.0)))
            .map(|(p, _)| p.clone())
        else {
            return Ok(state.clone());
        };

        for node in self.ordered_candidates(&package, &state.domains[&package]) {
            search.visits += 1;
            if search.visits > self.budget {
                return Err(Stop::Budget);
            }
            tracing::debug!("Trying {} (depth {})", self.graph.node(node), state.depth);

            let mut next = state.clone();
            if !self.assign(&mut next, &package, node, search) {
                continue;
            }
            match self.search(&next, search) {
                Ok(solution) => return Ok(solution),
                Err(Stop::Exhausted) => {
                    tracing::debug!("Backtracking from {}", self.graph.node(node));
                }
                Err(stop) => return Err(stop),
            }
        }
        Err(Stop::Exhausted)
    }

    /// The pinned version first when still a candidate, then newest to oldest.
    fn ordered_candidates(&self, package: &str, domain: &[NodeId]) -> Vec<NodeId> {
        let mut ordered = domain.to_vec();
        if let Some(pin) = self.pinned.get(package) {
            if let Some(at) = ordered
                .iter()
                .position(|&n| self.graph.node(n).version() == pin)
            {
                let preferred = ordered.remove(at);
                ordered.insert(0, preferred);
            }
        }
        ordered
    }

    fn assign(&self, state: &mut State, package: &str, node: NodeId, search: &mut Search) -> bool {
        state.domains.remove(package);
        state.assigned.insert(package.to_string(), node);
        state.depth += 1;

        for (edge_id, edge) in self.graph.edges_from(node) {
            match edge.kind {
                DependencyKind::Required | DependencyKind::Incompatible => {
                    if !self.impose(state, &edge.to, Origin::Edge(edge_id, node), search) {
                        return false;
                    }
                }
                DependencyKind::Optional | DependencyKind::Embedded => {}
            }
        }
        true
    }

    /// Apply one constraint to `package`. Required constraints activate the
    /// package; incompatibilities on inactive packages are only remembered.
    /// Returns `false` (after recording the failure) if nothing is left.
    fn impose(&self, state: &mut State, package: &str, origin: Origin, search: &mut Search) -> bool {
        let negative = self.constraint(origin).1;
        state
            .imposed
            .entry(package.to_string())
            .or_default()
            .push(origin);

        let failed: Option<Option<NodeId>> = if let Some(&chosen) = state.assigned.get(package) {
            (!self.allows(origin, chosen)).then_some(Some(chosen))
        } else if let Some(domain) = state.domains.get_mut(package) {
            domain.retain(|&n| self.allows(origin, n));
            domain.is_empty().then_some(None)
        } else if !negative {
            let imposed = state.imposed.get(package).map(Vec::as_slice).unwrap_or(&[]);
            let domain: Vec<NodeId> = self
                .graph
                .candidates(package)
                .iter()
                .copied()
                .filter(|&n| self.allowed_by_all(imposed, n))
                .collect();
            let empty = domain.is_empty();
            state.domains.insert(package.to_string(), domain);
            empty.then_some(None)
        } else {
            None
        };

        match failed {
            Some(rejected) => {
                self.record(search, state, package, rejected);
                false
            }
            None => true,
        }
    }

    /// The range of a constraint and whether it excludes (`true`) or requires matches.
    fn constraint(&self, origin: Origin) -> (&VersionRange, bool) {
        match origin {
            Origin::Root(i) => (&self.roots[i].constraint, false),
            Origin::Edge(edge, _) => {
                let edge = self.graph.edge(edge);
                (&edge.constraint, edge.kind == DependencyKind::Incompatible)
            }
        }
    }

    fn allows(&self, origin: Origin, node: NodeId) -> bool {
        let (range, negative) = self.constraint(origin);
        range.matches(self.graph.node(node).version()) != negative
    }

    fn allowed_by_all(&self, origins: &[Origin], node: NodeId) -> bool {
        origins.iter().all(|&o| self.allows(o, node))
    }

    fn record(&self, search: &mut Search, state: &State, package: &str, rejected: Option<NodeId>) {
        let imposed = state.imposed.get(package).map(Vec::as_slice).unwrap_or(&[]);
        let (culprits, genuine) = self.minimal_conflict(package, imposed, rejected);
        let deeper = match &search.deepest {
            None => true,
            Some(best) => (genuine, state.depth) > (best.genuine, best.depth),
        };
        if deeper {
            search.deepest = Some(Failure {
                package_id: package.to_string(),
                depth: state.depth,
                genuine,
                culprits,
                rejected,
                assigned: state.assigned.clone(),
            });
        }
    }

    /// Smallest subset of `imposed` that no candidate of `package` satisfies:
    /// a single constraint, else the first clashing pair, else all of them.
    /// If the constraints are satisfiable together the clash is with the
    /// version already selected, and only the constraints rejecting it are kept.
    fn minimal_conflict(
        &self,
        package: &str,
        imposed: &[Origin],
        rejected: Option<NodeId>,
    ) -> (Vec<Origin>, bool) {
        let candidates = self.graph.candidates(package);
        let admits = |set: &[Origin]| candidates.iter().any(|&n| self.allowed_by_all(set, n));

        for &single in imposed {
            if !admits(&[single]) {
                return (self.with_requirement(vec![single], imposed), true);
            }
        }
        for (i, &first) in imposed.iter().enumerate() {
            for &second in &imposed[i + 1..] {
                if !admits(&[first, second]) {
                    return (self.with_requirement(vec![first, second], imposed), true);
                }
            }
        }
        if !admits(imposed) {
            return (imposed.to_vec(), true);
        }

        let violated = match rejected {
            Some(node) => imposed
                .iter()
                .copied()
                .filter(|&o| !self.allows(o, node))
                .collect(),
            None => imposed.to_vec(),
        };
        (self.with_requirement(violated, imposed), false)
    }

    /// An incompatibility alone explains nothing without the requirement
    /// that pulled the package in.
    fn with_requirement(&self, mut culprits: Vec<Origin>, imposed: &[Origin]) -> Vec<Origin> {
        if culprits.iter().all(|&o| self.constraint(o).1) {
            if let Some(&requirement) = imposed.iter().find(|&&o| !self.constraint(o).1) {
                culprits.insert(0, requirement);
            }
        }
        culprits
    }

    fn explain(&self, failure: Option<&Failure>) -> ResolutionConflict {
        let Some(failure) = failure else {
            return ResolutionConflict::new(ConflictKind::Unsatisfiable);
        };

        let kind = if failure.culprits.iter().any(|&o| self.constraint(o).1) {
            ConflictKind::IncompatiblePair
        } else {
            ConflictKind::Unsatisfiable
        };
        let derivations = failure
            .culprits
            .iter()
            .map(|&origin| self.derivation(origin, &failure.assigned))
            .collect();
        let selected_version = match (failure.genuine, failure.rejected) {
            (false, Some(node)) => Some(self.graph.node(node).version().clone()),
            _ => None,
        };

        ResolutionConflict {
            kind,
            package_id: Some(failure.package_id.clone()),
            selected_version,
            derivations,
        }
    }

    /// Shortest chain from a root requirement to the constraint `origin`.
    fn derivation(&self, origin: Origin, assigned: &BTreeMap<String, NodeId>) -> Vec<ExplanationStep> {
        match origin {
            Origin::Root(i) => vec![self.root_step(i)],
            Origin::Edge(edge, declaring) => {
                let mut chain = self.path_to(declaring, assigned);
                chain.push(self.edge_step(edge, declaring));
                chain
            }
        }
    }

    /// Breadth-first search over Required edges between selected nodes.
    fn path_to(&self, target: NodeId, assigned: &BTreeMap<String, NodeId>) -> Vec<ExplanationStep> {
        let target = self.graph.node(target).package_id();
        let mut reached: BTreeMap<String, Via> = BTreeMap::new();
        let mut queue = VecDeque::new();

        for (i, root) in self.roots.iter().enumerate() {
            if assigned.contains_key(&root.package_id) && !reached.contains_key(&root.package_id) {
                reached.insert(root.package_id.clone(), Via::Root(i));
                queue.push_back(root.package_id.clone());
            }
        }

        while let Some(package) = queue.pop_front() {
            if package == target {
                break;
            }
            let Some(&node) = assigned.get(&package) else {
                continue;
            };
            for (edge_id, edge) in self.graph.edges_from(node) {
                if edge.kind != DependencyKind::Required
                    || !assigned.contains_key(&edge.to)
                    || reached.contains_key(&edge.to)
                {
                    continue;
                }
                reached.insert(edge.to.clone(), Via::Edge(edge_id, package.clone()));
                queue.push_back(edge.to.clone());
            }
        }

        let mut steps = Vec::new();
        let mut current = target.to_string();
        // Each package is reached once, so the walk back is bounded.
        for _ in 0..=reached.len() {
            match reached.get(&current) {
                Some(Via::Root(i)) => {
                    steps.push(self.root_step(*i));
                    break;
                }
                Some(Via::Edge(edge, from)) => {
                    if let Some(&declaring) = assigned.get(from) {
                        steps.push(self.edge_step(*edge, declaring));
                    }
                    current = from.clone();
                }
                None => break,
            }
        }
        steps.reverse();
        steps
    }

    fn root_step(&self, i: usize) -> ExplanationStep {
        let root = &self.roots[i];
        ExplanationStep::Root {
            package_id: root.package_id.clone(),
            constraint: root.constraint.clone(),
        }
    }

    fn edge_step(&self, edge: EdgeId, declaring: NodeId) -> ExplanationStep {
        let edge = self.graph.edge(edge);
        ExplanationStep::Edge {
            from: self.graph.node(declaring).to_string(),
            to: edge.to.clone(),
            constraint: edge.constraint.clone(),
            kind: edge.kind,
        }
    }

    fn finish(&self, solution: State, visits: u64) -> ResolutionResult {
        match self.graph.topological_order(&solution.assigned) {
            Ok(order) => {
                let selected: BTreeMap<String, ModNode> = solution
                    .assigned
                    .iter()
                    .map(|(p, &n)| (p.clone(), self.graph.node(n).clone()))
                    .collect();
                tracing::info!("Resolved {} package(s) in {visits} visit(s)", selected.len());
                ResolutionResult::Resolved(Selection {
                    ids: solution.assigned,
                    selected,
                    order,
                    visits,
                })
            }
            Err(err) => {
                tracing::warn!("{err}");
                let packages = err.cycle.packages;
                let mut chain = Vec::new();
                for (i, from) in packages.iter().enumerate() {
                    let to = &packages[(i + 1) % packages.len()];
                    let Some(&node) = solution.assigned.get(from) else {
                        continue;
                    };
                    if let Some((edge, _)) = self
                        .graph
                        .edges_from(node)
                        .find(|(_, e)| e.kind == DependencyKind::Required && e.to == *to)
                    {
                        chain.push(self.edge_step(edge, node));
                    }
                }
                ResolutionResult::Conflict(ResolutionConflict {
                    package_id: packages.first().cloned(),
                    kind: ConflictKind::Cycle { packages },
                    selected_version: None,
                    derivations: vec![chain],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyEdge, EdgeSource};

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap()
    }

    fn require(g: &mut DependencyGraph, from: NodeId, to: &str, range: &str) {
        g.add_edge(DependencyEdge {
            from: EdgeSource::Node(from),
            to: to.to_string(),
            constraint: VersionRange::parse(range).unwrap(),
            kind: DependencyKind::Required,
        })
        .unwrap();
    }

    #[test]
    fn picks_newest_by_default() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        g.add_node(ModNode::new("a", v("1.1"))).unwrap();
        let selection = Resolver::new(&g)
            .root(RootRequirement::any("a"))
            .resolve()
            .into_result()
            .unwrap();
        assert_eq!(selection.get("a").unwrap().version(), &v("1.1"));
        assert_eq!(selection.visits(), 1);
    }

    #[test]
    fn pinned_version_wins_when_compatible() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        g.add_node(ModNode::new("a", v("1.1"))).unwrap();
        let pinned = [("a".to_string(), v("1.0"))].into_iter().collect();
        let selection = Resolver::new(&g)
            .root(RootRequirement::any("a"))
            .pinned(pinned)
            .resolve()
            .into_result()
            .unwrap();
        assert_eq!(selection.get("a").unwrap().version(), &v("1.0"));
    }

    #[test]
    fn pinned_version_ignored_when_excluded() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        g.add_node(ModNode::new("a", v("2.0"))).unwrap();
        let pinned = [("a".to_string(), v("1.0"))].into_iter().collect();
        let selection = Resolver::new(&g)
            .root(RootRequirement::new("a", VersionRange::parse(">=2.0").unwrap()))
            .pinned(pinned)
            .resolve()
            .into_result()
            .unwrap();
        assert_eq!(selection.get("a").unwrap().version(), &v("2.0"));
    }

    #[test]
    fn empty_roots_resolve_to_empty_selection() {
        let g = DependencyGraph::new();
        let selection = Resolver::new(&g).resolve().into_result().unwrap();
        assert!(selection.is_empty());
        assert!(selection.order().is_empty());
    }

    #[test]
    fn unsatisfiable_root_constraint() {
        let mut g = DependencyGraph::new();
        g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let conflict = Resolver::new(&g)
            .root(RootRequirement::new("a", VersionRange::parse(">=2.0").unwrap()))
            .resolve()
            .into_result()
            .unwrap_err();
        assert_eq!(conflict.kind, ConflictKind::Unsatisfiable);
        assert_eq!(conflict.package_id.as_deref(), Some("a"));
        assert_eq!(conflict.derivations.len(), 1);
    }

    #[test]
    fn required_cycle_in_selection_is_reported() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(ModNode::new("a", v("1.0"))).unwrap();
        let b = g.add_node(ModNode::new("b", v("1.0"))).unwrap();
        require(&mut g, a, "b", "*");
        require(&mut g, b, "a", "*");
        let conflict = Resolver::new(&g)
            .root(RootRequirement::any("a"))
            .resolve()
            .into_result()
            .unwrap_err();
        assert_eq!(
            conflict.kind,
            ConflictKind::Cycle {
                packages: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(conflict.derivations[0].len(), 2);
    }
}
