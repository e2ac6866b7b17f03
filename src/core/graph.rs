//! Composition graph: nodes plus explicit "provision after" edges.
//!
//! Ordering is Kahn's algorithm with alphabetical tie-breaking, so a given
//! node and edge set always yields the same sequence regardless of
//! registration order.

use super::error::ValidationError;
use crate::resources::{NodeId, ResourceNode};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Lifecycle of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Accepting nodes
    Building,
    /// Validated; order cached, no further changes
    Frozen,
}

#[derive(Debug, Clone)]
pub struct CompositionGraph {
    nodes: IndexMap<NodeId, ResourceNode>,
    /// node -> nodes it must be provisioned after
    depends_on: IndexMap<NodeId, Vec<NodeId>>,
    state: GraphState,
    order: Vec<NodeId>,
}

impl Default for CompositionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionGraph {
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            depends_on: IndexMap::new(),
            state: GraphState::Building,
            order: Vec::new(),
        }
    }

    /// Register `node`, to be provisioned after every node in `depends_on`.
    /// Dependencies may be registered later; they are checked by
    /// [`validate`](Self::validate).
    pub fn add_node(&mut self, node: ResourceNode, depends_on: &[NodeId]) -> Result<(), ValidationError> {
        if self.state == GraphState::Frozen {
            return Err(ValidationError::GraphFrozen);
        }
        if self.nodes.contains_key(&node.id) {
            return Err(ValidationError::DuplicateNode(node.id));
        }
        let mut deps: Vec<NodeId> = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        self.depends_on.insert(node.id.clone(), deps);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Check the graph and freeze it, returning the emission order.
    ///
    /// Fails on unknown dependencies, cycles, and output references whose
    /// producer is not an ancestor. A failed validation leaves the graph in
    /// [`GraphState::Building`]; a frozen graph returns its cached order.
    pub fn validate(&mut self) -> Result<Vec<NodeId>, ValidationError> {
        if self.state == GraphState::Frozen {
            return Ok(self.order.clone());
        }

        for (id, deps) in &self.depends_on {
            if let Some(missing) = deps.iter().find(|d| !self.nodes.contains_key(*d)) {
                return Err(ValidationError::MissingDependency {
                    node: id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let order = topological_order(&self.depends_on)?;
        let ancestors = ancestor_sets(&self.depends_on, &order);

        for id in &order {
            let node = &self.nodes[id];
            for target in node.referenced_nodes() {
                let reachable = ancestors.get(id.as_str()).is_some_and(|a| a.contains(target));
                if !reachable {
                    return Err(ValidationError::UnreachableReference {
                        node: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        tracing::debug!(nodes = order.len(), "graph validated and frozen");
        self.order = order.clone();
        self.state = GraphState::Frozen;
        Ok(order)
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Declared dependencies of `id`, in declaration order.
    pub fn dependencies(&self, id: &str) -> &[NodeId] {
        self.depends_on.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Nodes in emission order. Empty until the graph is frozen.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Every (from, to) edge: `to` is provisioned after `from`.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> = self
            .depends_on
            .iter()
            .flat_map(|(to, deps)| deps.iter().map(move |from| (from.clone(), to.clone())))
            .collect();
        edges.sort();
        edges
    }
}

/// Kahn's algorithm over `depends_on` (node -> prerequisites) with sorted
/// tie-breaking. Every prerequisite must itself be a key.
pub fn topological_order(depends_on: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, ValidationError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, deps) in depends_on {
        in_degree.insert(id.as_str(), deps.len());
        dependents.entry(id.as_str()).or_default();
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into_iter().collect();

    let mut order: Vec<String> = Vec::with_capacity(depends_on.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        for &dependent in dependents.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(dependent);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != depends_on.len() {
        return Err(ValidationError::Cycle {
            nodes: cycle_members(depends_on, &order),
        });
    }
    Ok(order)
}

/// Nodes left over after Kahn's pass, minus those that only hang off a
/// cycle (nothing left over depends on them).
fn cycle_members(depends_on: &IndexMap<String, Vec<String>>, ordered: &[String]) -> Vec<String> {
    let mut remaining: BTreeSet<&str> = depends_on
        .keys()
        .map(String::as_str)
        .filter(|id| !ordered.iter().any(|o| o == id))
        .collect();

    loop {
        let leaves: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|candidate| {
                !remaining.iter().any(|other| {
                    depends_on
                        .get(*other)
                        .is_some_and(|deps| deps.iter().any(|d| d == candidate))
                })
            })
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(leaf);
        }
    }
    remaining.into_iter().map(String::from).collect()
}

/// Transitive prerequisites of `id`.
pub fn ancestors(depends_on: &IndexMap<String, Vec<String>>, id: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = depends_on
        .get(id)
        .map(|d| d.iter().map(String::as_str).collect())
        .unwrap_or_default();
    while let Some(current) = stack.pop() {
        if seen.insert(current.to_string()) {
            if let Some(deps) = depends_on.get(current) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
    }
    seen
}

/// Ancestor sets for every node, built in one pass over a valid order.
fn ancestor_sets<'a>(
    depends_on: &'a IndexMap<String, Vec<String>>,
    order: &'a [String],
) -> HashMap<&'a str, BTreeSet<&'a str>> {
    let mut sets: HashMap<&str, BTreeSet<&str>> = HashMap::with_capacity(order.len());
    for id in order {
        let mut set = BTreeSet::new();
        for dep in depends_on.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            set.insert(dep.as_str());
            if let Some(upstream) = sets.get(dep.as_str()) {
                set.extend(upstream.iter().copied());
            }
        }
        sets.insert(id.as_str(), set);
    }
    sets
}
