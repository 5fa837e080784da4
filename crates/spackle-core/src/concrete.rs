//! Concrete specs: fully assigned, hashed dependency DAGs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use thiserror::Error;

use spackle_util::hash::{sha256_bytes, short_hash};

use crate::compiler::CompilerSpec;
use crate::package::DepTypes;
use crate::predicate::Assignment;
use crate::spec::{NodeConstraint, Spec};
use crate::variant::{format_variant, VariantValue};
use crate::version::{Version, VersionConstraint};

/// Errors raised while assembling a concrete graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle through {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },
    #[error("edge {from} -> {to} refers to an unknown node")]
    DanglingEdge { from: String, to: String },
    #[error("package '{0}' appears more than once")]
    DuplicateNode(String),
    #[error("root '{0}' is not a node of the graph")]
    MissingRoot(String),
    #[error("no root was set")]
    NoRoot,
    #[error("package '{0}' is not reachable from the root")]
    Unreachable(String),
}

/// One fully assigned package in a concrete graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteNode {
    pub name: String,
    pub version: Version,
    /// Every variant the package declares, with its assigned value.
    pub variants: BTreeMap<String, VariantValue>,
    pub compiler: CompilerSpec,
    pub platform: String,
    /// Install prefix when the node is a pre-existing installation.
    pub external_prefix: Option<String>,
    /// Filled in by [`ConcreteSpecBuilder::build`].
    pub fingerprint: String,
}

impl ConcreteNode {
    pub fn new(
        name: impl Into<String>,
        version: Version,
        compiler: CompilerSpec,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            variants: BTreeMap::new(),
            compiler,
            platform: platform.into(),
            external_prefix: None,
            fingerprint: String::new(),
        }
    }

    pub fn with_variant(mut self, name: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(name.into(), value);
        self
    }

    pub fn with_external_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.external_prefix = Some(prefix.into());
        self
    }

    pub fn is_external(&self) -> bool {
        self.external_prefix.is_some()
    }

    pub fn assignment(&self) -> Assignment<'_> {
        Assignment {
            version: &self.version,
            variants: &self.variants,
            compiler: &self.compiler,
            platform: &self.platform,
        }
    }

    pub fn short_hash(&self) -> &str {
        short_hash(&self.fingerprint)
    }

    /// The exact abstract constraint this node satisfies.
    pub fn to_constraint(&self) -> NodeConstraint {
        NodeConstraint {
            versions: VersionConstraint::Exact(self.version.clone()),
            variants: self.variants.clone(),
            compiler: Some(self.compiler.to_constraint()),
            platform: Some(self.platform.clone()),
        }
    }

    /// Canonical serialization of the node's own attributes; the first
    /// line of its fingerprint input.
    pub fn canonical_line(&self) -> String {
        let mut line = format!("{}@={}", self.name, self.version);
        for (name, value) in &self.variants {
            line.push(' ');
            line.push_str(&format_variant(name, value));
        }
        line.push_str(&format!(" %{} arch={}", self.compiler, self.platform));
        if let Some(prefix) = &self.external_prefix {
            line.push_str(&format!(" external={prefix}"));
        }
        line
    }
}

impl fmt::Display for ConcreteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        for (name, value) in &self.variants {
            write!(f, " {}", format_variant(name, value))?;
        }
        write!(f, " %{}", self.compiler)?;
        if self.is_external() {
            f.write_str(" [external]")?;
        }
        if !self.fingerprint.is_empty() {
            write!(f, " /{}", self.short_hash())?;
        }
        Ok(())
    }
}

/// Label on a dependency edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepEdge {
    pub deptypes: DepTypes,
    /// Virtual names this edge satisfies, if the dependency is a provider.
    pub virtuals: BTreeSet<String>,
}

impl DepEdge {
    pub fn new(deptypes: DepTypes) -> Self {
        Self {
            deptypes,
            virtuals: BTreeSet::new(),
        }
    }

    pub fn with_virtual(mut self, name: impl Into<String>) -> Self {
        self.virtuals.insert(name.into());
        self
    }

    fn absorb(&mut self, other: &DepEdge) {
        self.deptypes |= other.deptypes;
        self.virtuals.extend(other.virtuals.iter().cloned());
    }
}

/// Traversal order for [`ConcreteSpec::traverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// A node before its dependencies.
    Pre,
    /// A node after its dependencies.
    Post,
}

/// Collects nodes and edges in any order, then validates and hashes them.
#[derive(Debug, Default)]
pub struct ConcreteSpecBuilder {
    nodes: Vec<ConcreteNode>,
    edges: Vec<(String, String, DepEdge)>,
    root: Option<String>,
}

impl ConcreteSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ConcreteNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge; repeated edges between the same pair are merged.
    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        edge: DepEdge,
    ) -> &mut Self {
        self.edges.push((from.into(), to.into(), edge));
        self
    }

    pub fn set_root(&mut self, name: impl Into<String>) -> &mut Self {
        self.root = Some(name.into());
        self
    }

    pub fn build(self) -> Result<ConcreteSpec, GraphError> {
        let mut graph: DiGraph<ConcreteNode, DepEdge> = DiGraph::new();
        let mut index = HashMap::new();

        for node in self.nodes {
            if index.contains_key(&node.name) {
                return Err(GraphError::DuplicateNode(node.name));
            }
            let name = node.name.clone();
            let idx = graph.add_node(node);
            index.insert(name, idx);
        }

        let root_name = self.root.ok_or(GraphError::NoRoot)?;
        let root = *index
            .get(&root_name)
            .ok_or(GraphError::MissingRoot(root_name.clone()))?;

        for (from, to, edge) in self.edges {
            let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) else {
                return Err(GraphError::DanglingEdge { from, to });
            };
            match graph.find_edge(a, b) {
                Some(existing) => graph[existing].absorb(&edge),
                None => {
                    graph.add_edge(a, b, edge);
                }
            }
        }

        let order = toposort(&graph, None).map_err(|_| GraphError::Cycle {
            members: cycle_members(&graph),
        })?;

        let reachable = reachable_from(&graph, root);
        if let Some(idx) = graph.node_indices().find(|idx| !reachable.contains(idx)) {
            return Err(GraphError::Unreachable(graph[idx].name.clone()));
        }

        // Dependencies come after their dependents in `order`.
        for &idx in order.iter().rev() {
            let mut canonical = graph[idx].canonical_line();
            canonical.push('\n');
            let mut deps: Vec<(&str, &str, &DepEdge)> = graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| {
                    let target = &graph[e.target()];
                    (target.name.as_str(), target.fingerprint.as_str(), e.weight())
                })
                .collect();
            deps.sort_by(|a, b| a.0.cmp(b.0));
            for (name, fingerprint, edge) in deps {
                canonical.push_str(&format!("^{name}/{fingerprint}:{}", edge.deptypes));
                if !edge.virtuals.is_empty() {
                    canonical.push(':');
                    let virtuals: Vec<&str> = edge.virtuals.iter().map(String::as_str).collect();
                    canonical.push_str(&virtuals.join(","));
                }
                canonical.push('\n');
            }
            graph[idx].fingerprint = sha256_bytes(canonical.as_bytes());
        }

        Ok(ConcreteSpec { graph, index, root })
    }
}

fn cycle_members(graph: &DiGraph<ConcreteNode, DepEdge>) -> Vec<String> {
    for scc in tarjan_scc(graph) {
        let self_loop = scc.len() == 1 && graph.find_edge(scc[0], scc[0]).is_some();
        if scc.len() > 1 || self_loop {
            let mut members: Vec<String> = scc.iter().map(|&i| graph[i].name.clone()).collect();
            members.sort();
            return members;
        }
    }
    Vec::new()
}

fn reachable_from(graph: &DiGraph<ConcreteNode, DepEdge>, root: NodeIndex) -> HashSet<NodeIndex> {
    let mut seen = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}

/// An immutable, hashed, acyclic dependency graph with a single root.
///
/// Nodes are unique per package name. Every accessor that returns several
/// nodes returns them in a deterministic order (by name unless the
/// operation defines its own).
#[derive(Debug, Clone)]
pub struct ConcreteSpec {
    graph: DiGraph<ConcreteNode, DepEdge>,
    index: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl ConcreteSpec {
    pub fn root(&self) -> &ConcreteNode {
        &self.graph[self.root]
    }

    /// The root's fingerprint, identifying the whole graph.
    pub fn fingerprint(&self) -> &str {
        &self.root().fingerprint
    }

    pub fn node(&self, name: &str) -> Option<&ConcreteNode> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All nodes sorted by name.
    pub fn nodes(&self) -> Vec<&ConcreteNode> {
        let mut nodes: Vec<&ConcreteNode> = self.graph.node_weights().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    /// Direct dependencies of `name`, sorted by name.
    pub fn dependencies(&self, name: &str) -> Vec<(&ConcreteNode, &DepEdge)> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Direct dependents of `name`, sorted by name.
    pub fn dependents(&self, name: &str) -> Vec<(&ConcreteNode, &DepEdge)> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<(&ConcreteNode, &DepEdge)> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<(&ConcreteNode, &DepEdge)> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (&self.graph[other], e.weight())
            })
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        out
    }

    /// Depth-first walk from the root, following only edges whose
    /// dependency types intersect `deptypes`. Each node is visited once;
    /// siblings are visited in name order.
    pub fn traverse(&self, order: Order, deptypes: DepTypes) -> Vec<&ConcreteNode> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.visit(self.root, order, deptypes, &mut visited, &mut out);
        out
    }

    fn visit<'a>(
        &'a self,
        idx: NodeIndex,
        order: Order,
        deptypes: DepTypes,
        visited: &mut HashSet<NodeIndex>,
        out: &mut Vec<&'a ConcreteNode>,
    ) {
        if !visited.insert(idx) {
            return;
        }
        if order == Order::Pre {
            out.push(&self.graph[idx]);
        }
        for child in self.children(idx, deptypes) {
            self.visit(child, order, deptypes, visited, out);
        }
        if order == Order::Post {
            out.push(&self.graph[idx]);
        }
    }

    fn children(&self, idx: NodeIndex, deptypes: DepTypes) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().deptypes.intersects(deptypes))
            .map(|e| e.target())
            .collect();
        children.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        children
    }

    /// Dependencies before dependents; ties broken by name.
    pub fn topological_order(&self) -> Vec<&ConcreteNode> {
        let mut pending: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let outgoing = self.graph.edges_directed(idx, Direction::Outgoing).count();
                (idx, outgoing)
            })
            .collect();
        let mut ready: BTreeSet<(&str, NodeIndex)> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&idx, _)| (self.graph[idx].name.as_str(), idx))
            .collect();

        let mut out = Vec::with_capacity(self.len());
        while let Some((_, idx)) = ready.pop_first() {
            out.push(&self.graph[idx]);
            for dependent in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((self.graph[dependent].name.as_str(), dependent));
                    }
                }
            }
        }
        out
    }

    /// Path of nodes from the root down to `name`, if it is in the graph.
    pub fn find_path(&self, name: &str) -> Option<Vec<&ConcreteNode>> {
        let target = *self.index.get(name)?;
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.dfs_path(self.root, target, &mut path, &mut visited) {
            Some(path.iter().map(|&idx| &self.graph[idx]).collect())
        } else {
            None
        }
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for child in self.children(current, DepTypes::ALL) {
            if self.dfs_path(child, target, path, visited) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Render the graph as an indented tree, optionally cut at `max_depth`.
    ///
    /// A node already printed higher up shows its subtree only the first time.
    pub fn tree(&self, max_depth: Option<usize>) -> String {
        let mut output = format!("{}\n", self.root());
        let mut printed = HashSet::from([self.root]);
        let children = self.children(self.root, DepTypes::ALL);
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.print_subtree(&mut output, child, "", i == count - 1, 1, max_depth, &mut printed);
        }
        output
    }

    #[allow(clippy::too_many_arguments)]
    fn print_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        is_last: bool,
        depth: usize,
        max_depth: Option<usize>,
        printed: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = &self.graph[idx];
        let first_time = printed.insert(idx);
        let children = self.children(idx, DepTypes::ALL);
        let marker = if !first_time && !children.is_empty() {
            " (*)"
        } else {
            ""
        };
        output.push_str(&format!("{prefix}{connector}{node}{marker}\n"));

        if !first_time || max_depth.is_some_and(|max| depth >= max) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            self.print_subtree(
                output,
                child,
                &child_prefix,
                i == count - 1,
                depth + 1,
                max_depth,
                printed,
            );
        }
    }

    /// Render who depends on `name`, up to the root.
    pub fn inverted_tree(&self, name: &str) -> String {
        let mut output = String::new();
        let Some(&idx) = self.index.get(name) else {
            return output;
        };
        output.push_str(&format!("{}\n", self.graph[idx]));
        let mut on_path = HashSet::from([idx]);
        self.print_inverted(&mut output, idx, "", &mut on_path);
        output
    }

    fn print_inverted(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        on_path: &mut HashSet<NodeIndex>,
    ) {
        let mut parents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        parents.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        parents.dedup();
        let count = parents.len();
        for (i, parent) in parents.into_iter().enumerate() {
            let is_last = i == count - 1;
            let connector = if is_last { "└── " } else { "├── " };
            output.push_str(&format!("{prefix}{connector}{}\n", self.graph[parent]));
            if on_path.insert(parent) {
                let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
                self.print_inverted(output, parent, &child_prefix, on_path);
                on_path.remove(&parent);
            }
        }
    }

    /// The fully pinned abstract request that concretizes back to this graph.
    pub fn to_abstract(&self) -> Spec {
        let root = self.root();
        let mut spec = Spec {
            name: root.name.clone(),
            constraint: root.to_constraint(),
            dependencies: Vec::new(),
        };
        for node in self.nodes() {
            if node.name != root.name {
                spec.dependencies.push(Spec {
                    name: node.name.clone(),
                    constraint: node.to_constraint(),
                    dependencies: Vec::new(),
                });
            }
        }
        spec
    }

    /// Whether this graph meets an abstract request: the root satisfies
    /// the request's constraint and every pin names a satisfying node.
    pub fn satisfies(&self, spec: &Spec) -> bool {
        let root = self.root();
        root.name == spec.name
            && spec.constraint.satisfied_by(&root.assignment())
            && spec.pins().into_iter().all(|pin| {
                self.node(&pin.name)
                    .is_some_and(|node| pin.constraint.satisfied_by(&node.assignment()))
            })
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (&ConcreteNode, &ConcreteNode, &DepEdge)> {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()], e.weight()))
    }
}

impl PartialEq for ConcreteSpec {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for ConcreteSpec {}

impl fmt::Display for ConcreteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_abstract())
    }
}
