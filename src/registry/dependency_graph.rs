// # Dependency Graph
//
// Directed graph of component ids with insertion-ordered adjacency lists.
// Edge order equals declaration order, which makes impact analysis
// deterministic. Cycles are permitted; traversals carry visited sets.

use std::collections::{HashMap, HashSet, VecDeque};

use super::ComponentId;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InStack,
    Done,
}

// Adjacency lists keyed by component id. `order` preserves node insertion
// order so dependent lookups and BFS are deterministic.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<ComponentId, Vec<ComponentId>>,
    order: Vec<ComponentId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: ComponentId) {
        if !self.nodes.contains_key(&id) {
            self.nodes.insert(id.clone(), Vec::new());
            self.order.push(id);
        }
    }

    // Removes the node and scrubs it from every adjacency list.
    pub fn remove_node(&mut self, id: &ComponentId) {
        self.nodes.remove(id);
        self.order.retain(|n| n != id);
        for deps in self.nodes.values_mut() {
            deps.retain(|d| d != id);
        }
    }

    pub fn has_node(&self, id: &ComponentId) -> bool {
        self.nodes.contains_key(id)
    }

    // `from` depends on `to`. Returns false when either endpoint is absent
    // or the edge would be a self-edge. Duplicate edges are suppressed.
    pub fn add_edge(&mut self, from: &ComponentId, to: &ComponentId) -> bool {
        if from == to || !self.nodes.contains_key(to) {
            return false;
        }
        match self.nodes.get_mut(from) {
            Some(deps) => {
                if !deps.contains(to) {
                    deps.push(to.clone());
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_edge(&mut self, from: &ComponentId, to: &ComponentId) {
        if let Some(deps) = self.nodes.get_mut(from) {
            deps.retain(|d| d != to);
        }
    }

    pub fn has_edge(&self, from: &ComponentId, to: &ComponentId) -> bool {
        self.nodes.get(from).is_some_and(|deps| deps.contains(to))
    }

    // Direct dependencies in declaration order.
    pub fn dependencies_of(&self, id: &ComponentId) -> Vec<ComponentId> {
        self.nodes.get(id).cloned().unwrap_or_default()
    }

    // Direct dependents, in node insertion order.
    pub fn dependents_of(&self, id: &ComponentId) -> Vec<ComponentId> {
        self.order
            .iter()
            .filter(|n| self.nodes.get(*n).is_some_and(|deps| deps.contains(id)))
            .cloned()
            .collect()
    }

    // Transitive dependents of `id` in breadth-first order. At each level
    // the order is determined by node insertion order; each node appears
    // at most once even when the graph is cyclic.
    pub fn impact_bfs(&self, id: &ComponentId) -> Vec<ComponentId> {
        let mut impacted = Vec::new();
        let mut visited: HashSet<ComponentId> = HashSet::new();
        visited.insert(id.clone());
        let mut queue: VecDeque<ComponentId> = self.dependents_of(id).into();

        while let Some(node) = queue.pop_front() {
            if visited.insert(node.clone()) {
                for parent in self.dependents_of(&node) {
                    queue.push_back(parent);
                }
                impacted.push(node);
            }
        }

        impacted
    }

    // Cycles reachable through the dependency edges, each reported as the
    // node path forming the loop. Deterministic: DFS roots and edge
    // traversal follow insertion order.
    pub fn find_cycles(&self) -> Vec<Vec<ComponentId>> {
        let mut state: HashMap<ComponentId, VisitState> = HashMap::new();
        let mut stack: Vec<ComponentId> = Vec::new();
        let mut cycles = Vec::new();

        for node in &self.order {
            if !state.contains_key(node) {
                self.dfs_cycles(node, &mut state, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    fn dfs_cycles(
        &self,
        node: &ComponentId,
        state: &mut HashMap<ComponentId, VisitState>,
        stack: &mut Vec<ComponentId>,
        cycles: &mut Vec<Vec<ComponentId>>,
    ) {
        state.insert(node.clone(), VisitState::InStack);
        stack.push(node.clone());

        for dep in self.dependencies_of(node) {
            match state.get(&dep).copied() {
                None => self.dfs_cycles(&dep, state, stack, cycles),
                Some(VisitState::InStack) => {
                    if let Some(pos) = stack.iter().position(|n| n == &dep) {
                        cycles.push(stack[pos..].to_vec());
                    }
                }
                Some(VisitState::Done) => {}
            }
        }

        stack.pop();
        state.insert(node.clone(), VisitState::Done);
    }

    // Nodes ordered so every dependency precedes its dependents (Kahn's
    // algorithm), or None when a cycle makes that impossible. Ties break
    // by node insertion order.
    pub fn topological_order(&self) -> Option<Vec<ComponentId>> {
        let mut remaining: HashMap<ComponentId, usize> = self
            .order
            .iter()
            .map(|n| {
                let deps = self.nodes[n].iter().filter(|d| self.has_node(d)).count();
                (n.clone(), deps)
            })
            .collect();

        let mut queue: VecDeque<ComponentId> = self
            .order
            .iter()
            .filter(|n| remaining[*n] == 0)
            .cloned()
            .collect();
        let mut ordered = Vec::with_capacity(self.order.len());

        while let Some(node) = queue.pop_front() {
            for dependent in self.dependents_of(&node) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
            ordered.push(node);
        }

        if ordered.len() == self.order.len() {
            Some(ordered)
        } else {
            None
        }
    }

    // Snapshot of every adjacency list, in node insertion order.
    pub fn all_edges(&self) -> Vec<(ComponentId, Vec<ComponentId>)> {
        self.order
            .iter()
            .map(|n| (n.clone(), self.nodes[n].clone()))
            .collect()
    }

    pub fn nodes(&self) -> Vec<ComponentId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }
}
