//! Dependency graphs over components and other ordered resources.
//!
//! [`DependencyGraph`] is a small directed graph with two jobs: refuse edges
//! that would close a cycle (reporting the offending path), and produce a
//! deterministic topological order. It is keyed generically so the same
//! machinery orders component teardown here and system execution in the
//! scheduler.
//!
//! [`ComponentDependencyManager`] layers component semantics on top:
//! `A requires B` means an entity may not lose `B` while it still has `A`,
//! and entity teardown detaches dependents before their dependencies.

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use crate::archetype::ComponentMask;
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Directed acyclic graph of `dependent -> dependency` edges.
///
/// Nodes and edges keep insertion order, so [`topo_order`](Self::topo_order)
/// is stable across runs given the same declaration sequence.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    /// node -> the nodes it requires.
    requires: IndexMap<K, IndexSet<K>>,
    /// node -> the nodes that require it.
    required_by: IndexMap<K, IndexSet<K>>,
}

impl<K: Copy + Eq + Hash + Debug> DependencyGraph<K> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            requires: IndexMap::new(),
            required_by: IndexMap::new(),
        }
    }

    fn ensure_node(&mut self, node: K) {
        self.requires.entry(node).or_default();
        self.required_by.entry(node).or_default();
    }

    /// Whether `node` is present.
    pub fn contains(&self, node: K) -> bool {
        self.requires.contains_key(&node)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.requires.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
    }

    /// Add `dependent -> dependency`, refusing edges that would close a
    /// cycle.
    ///
    /// On refusal the error carries the would-be cycle as a node path whose
    /// first and last element are `dependent`. Re-adding an existing edge is
    /// a no-op.
    pub fn add_edge(&mut self, dependent: K, dependency: K) -> Result<(), Vec<K>> {
        self.ensure_node(dependent);
        self.ensure_node(dependency);

        if self.requires[&dependent].contains(&dependency) {
            return Ok(());
        }
        // The new edge closes a cycle iff the dependency already reaches the
        // dependent through existing edges.
        if let Some(path) = self.path(dependency, dependent) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(dependent);
            cycle.extend(path);
            return Err(cycle);
        }

        self.requires.entry(dependent).or_default().insert(dependency);
        self.required_by.entry(dependency).or_default().insert(dependent);
        Ok(())
    }

    /// Remove `dependent -> dependency`. Returns whether the edge existed.
    pub fn remove_edge(&mut self, dependent: K, dependency: K) -> bool {
        let removed = self
            .requires
            .get_mut(&dependent)
            .is_some_and(|set| set.shift_remove(&dependency));
        if removed {
            if let Some(set) = self.required_by.get_mut(&dependency) {
                set.shift_remove(&dependent);
            }
        }
        removed
    }

    /// Remove `node` and every edge touching it.
    pub fn remove_node(&mut self, node: K) {
        if let Some(deps) = self.requires.shift_remove(&node) {
            for dep in deps {
                if let Some(set) = self.required_by.get_mut(&dep) {
                    set.shift_remove(&node);
                }
            }
        }
        if let Some(dependents) = self.required_by.shift_remove(&node) {
            for dependent in dependents {
                if let Some(set) = self.requires.get_mut(&dependent) {
                    set.shift_remove(&node);
                }
            }
        }
    }

    /// The nodes `node` directly requires, in declaration order.
    pub fn dependencies_of(&self, node: K) -> impl Iterator<Item = K> + '_ {
        self.requires.get(&node).into_iter().flatten().copied()
    }

    /// The nodes that directly require `node`, in declaration order.
    pub fn dependents_of(&self, node: K) -> impl Iterator<Item = K> + '_ {
        self.required_by.get(&node).into_iter().flatten().copied()
    }

    /// Iterate all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = K> + '_ {
        self.requires.keys().copied()
    }

    /// A path `from -> ... -> to` through `requires` edges, if one exists.
    /// `from == to` yields the single-node path.
    fn path(&self, from: K, to: K) -> Option<Vec<K>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut came_from: IndexMap<K, K> = IndexMap::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            for dep in self.dependencies_of(node) {
                if dep == from || came_from.contains_key(&dep) {
                    continue;
                }
                came_from.insert(dep, node);
                if dep == to {
                    // Walk back to reconstruct the path.
                    let mut path = vec![to];
                    let mut cursor = to;
                    while cursor != from {
                        cursor = came_from[&cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    return Some(path);
                }
                stack.push(dep);
            }
        }
        None
    }

    /// Deterministic topological order with dependencies before dependents.
    ///
    /// Fails with a cycle path when the graph is not acyclic (possible only
    /// if edges bypassed [`add_edge`]'s check, kept as a guard for callers
    /// that build graphs wholesale).
    pub fn topo_order(&self) -> Result<Vec<K>, Vec<K>> {
        let mut pending: IndexMap<K, usize> = self
            .requires
            .iter()
            .map(|(&node, deps)| (node, deps.len()))
            .collect();
        let mut ready: Vec<K> = pending
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&node, _)| node)
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        let mut cursor = 0;
        while cursor < ready.len() {
            let node = ready[cursor];
            cursor += 1;
            order.push(node);
            for dependent in self.dependents_of(node) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }

        if order.len() == pending.len() {
            Ok(order)
        } else {
            Err(self.find_cycle().unwrap_or_default())
        }
    }

    /// Whether every declared edge can be honored by some linear order.
    pub fn validate_no_cycles(&self) -> bool {
        self.find_cycle().is_none()
    }

    /// Every distinct cycle reachable by depth-first search, each rendered as
    /// a closed path (`[a, b, a]`). Empty when the graph is acyclic.
    pub fn find_cycles(&self) -> Vec<Vec<K>> {
        let mut cycles = Vec::new();
        let mut visited: IndexSet<K> = IndexSet::new();
        for start in self.nodes() {
            if visited.contains(&start) {
                continue;
            }
            let mut in_stack: IndexSet<K> = IndexSet::new();
            let mut stack: Vec<K> = Vec::new();
            if let Some(cycle) = self.dfs_cycle(start, &mut visited, &mut in_stack, &mut stack) {
                cycles.push(cycle);
            }
        }
        cycles
    }

    /// Find some cycle via depth-first search. `None` when acyclic.
    fn find_cycle(&self) -> Option<Vec<K>> {
        let mut visited: IndexSet<K> = IndexSet::new();
        let mut in_stack: IndexSet<K> = IndexSet::new();
        let mut stack: Vec<K> = Vec::new();

        for start in self.nodes() {
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(start, &mut visited, &mut in_stack, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: K,
        visited: &mut IndexSet<K>,
        in_stack: &mut IndexSet<K>,
        stack: &mut Vec<K>,
    ) -> Option<Vec<K>> {
        visited.insert(node);
        in_stack.insert(node);
        stack.push(node);

        for dep in self.dependencies_of(node) {
            if in_stack.contains(&dep) {
                // Cyclic suffix of the stack, closed with the repeated node.
                let pos = stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle: Vec<K> = stack[pos..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, in_stack, stack) {
                    return Some(cycle);
                }
            }
        }

        in_stack.shift_remove(&node);
        stack.pop();
        None
    }
}

impl<K: Copy + Eq + Hash + Debug> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ComponentDependencyManager
// ---------------------------------------------------------------------------

/// Declared requirements between component types.
///
/// `declare(a, b)` records that component `a` requires component `b`.
/// Declarations that would create a cycle are rejected up front, so teardown
/// ordering always exists.
#[derive(Debug, Default)]
pub struct ComponentDependencyManager {
    graph: DependencyGraph<ComponentId>,
}

impl ComponentDependencyManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `dependent` requires `dependency`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyCycle`] when the declaration would close a
    /// requirement loop; the error names the cycle members in order.
    pub fn declare(
        &mut self,
        dependent: ComponentId,
        dependency: ComponentId,
        registry: &ComponentRegistry,
    ) -> Result<(), EcsError> {
        self.graph
            .add_edge(dependent, dependency)
            .map_err(|cycle| EcsError::DependencyCycle {
                cycle: cycle.iter().map(|&id| component_name(registry, id)).collect(),
            })
    }

    /// Remove a previously declared requirement. Returns whether it existed.
    pub fn undeclare(&mut self, dependent: ComponentId, dependency: ComponentId) -> bool {
        self.graph.remove_edge(dependent, dependency)
    }

    /// The components `id` directly requires.
    pub fn dependencies_of(&self, id: ComponentId) -> Vec<ComponentId> {
        self.graph.dependencies_of(id).collect()
    }

    /// The components that directly require `id`.
    pub fn dependents_of(&self, id: ComponentId) -> Vec<ComponentId> {
        self.graph.dependents_of(id).collect()
    }

    /// Check whether `component` may be detached from an entity whose current
    /// component set is `mask`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyViolation`] when the entity still carries a
    /// component that requires `component`; the error names the blockers.
    pub fn check_removal(
        &self,
        entity: Entity,
        component: ComponentId,
        mask: ComponentMask,
        registry: &ComponentRegistry,
    ) -> Result<(), EcsError> {
        let blockers: Vec<String> = self
            .graph
            .dependents_of(component)
            .filter(|&dep| dep != component && mask.contains(dep))
            .map(|dep| component_name(registry, dep))
            .collect();
        if blockers.is_empty() {
            Ok(())
        } else {
            Err(EcsError::DependencyViolation {
                entity,
                component: component_name(registry, component),
                dependents: blockers,
            })
        }
    }

    /// The declared components ordered dependencies-first: every requirement
    /// appears strictly before the components that require it.
    ///
    /// # Errors
    ///
    /// [`EcsError::DependencyCycle`] when the graph holds a cycle. Edges
    /// admitted through [`declare`](Self::declare) cannot form one, so this
    /// only trips for graphs assembled by other means.
    pub fn get_update_order(&self, registry: &ComponentRegistry) -> Result<Vec<ComponentId>, EcsError> {
        self.graph
            .topo_order()
            .map_err(|cycle| EcsError::DependencyCycle {
                cycle: cycle.iter().map(|&id| component_name(registry, id)).collect(),
            })
    }

    /// Whether the declared graph admits a full update order.
    pub fn validate_no_cycles(&self) -> bool {
        self.graph.validate_no_cycles()
    }

    /// The cycles currently in the graph, each as a closed component path.
    pub fn find_dependency_cycles(&self) -> Vec<Vec<ComponentId>> {
        self.graph.find_cycles()
    }

    /// Order the components of `mask` so dependents come before their
    /// dependencies. Entity teardown detaches in this order so no removal
    /// ever violates a declared requirement.
    pub fn removal_order(&self, mask: ComponentMask) -> Vec<ComponentId> {
        // Declared edges are cycle-checked, so the declared subset always
        // orders; components with no declarations keep ascending-bit order.
        let ordered = self.graph.topo_order().unwrap_or_default();
        let mut result: Vec<ComponentId> = ordered
            .into_iter()
            .rev()
            .filter(|&id| mask.contains(id))
            .collect();
        for id in mask.iter() {
            if !self.graph.contains(id) {
                result.push(id);
            }
        }
        result
    }

    /// Number of components with at least one declaration.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether no declarations exist.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

fn component_name(registry: &ComponentRegistry, id: ComponentId) -> String {
    registry
        .info(id)
        .map(|info| info.name.to_string())
        .unwrap_or_else(|| format!("component#{}", id.bit()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
