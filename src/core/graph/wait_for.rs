//! Wait-for graph over threads and locks
//!
//! The graph is rebuilt fresh on every monitoring tick from immutable
//! snapshots of lock waiter queues (copy-then-analyze), so cycle search never
//! runs against a structure that mutates mid-traversal.
//!
//! Nodes are bipartite: a `Thread` node points at the `Lock` node it is
//! blocked on, and a `Lock` node points at the `Thread` node currently
//! holding it. A cycle therefore alternates thread and lock nodes, e.g.
//! `A -> lock1 -> B -> lock2 -> A`.

use crate::core::locks::LockSnapshot;
use crate::core::types::{GraphSnapshot, WaitNode};
use fxhash::{FxHashMap, FxHashSet};

/// Directed graph of wait relationships between threads and locks
pub struct WaitForGraph {
    edges: FxHashMap<WaitNode, Vec<WaitNode>>,
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self {
            edges: FxHashMap::default(),
        }
    }

    /// Build the graph from a snapshot of every lock's `(owner, waiters)`
    ///
    /// For every lock with a non-empty waiter queue: one edge per waiting
    /// thread into the lock node, plus one edge from the lock node to its
    /// current holder. Locks nobody waits on contribute nothing.
    pub fn from_snapshots(snapshots: &[LockSnapshot]) -> Self {
        let mut graph = Self::new();
        for snap in snapshots {
            if snap.waiters.is_empty() {
                continue;
            }
            for &waiter in &snap.waiters {
                graph.add_edge(WaitNode::Thread(waiter), WaitNode::Lock(snap.id));
            }
            if let Some(owner) = snap.owner {
                graph.add_edge(WaitNode::Lock(snap.id), WaitNode::Thread(owner));
            }
        }
        graph
    }

    /// Add a directed edge; duplicate edges are ignored
    pub fn add_edge(&mut self, from: WaitNode, to: WaitNode) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
        // Make sure the target exists as a node even if it has no out-edges
        self.edges.entry(to).or_default();
    }

    /// Search the whole graph for cycles
    ///
    /// Depth-first search maintaining a visited set, an on-stack set, and the
    /// current path. Whenever a neighbor is already on the current path, the
    /// path slice from that neighbor's first occurrence to the current node
    /// is a cycle. Nodes are explored in sorted order so results are
    /// deterministic for a given snapshot.
    ///
    /// # Returns
    /// All cycles found, each as the ordered node path around the cycle
    pub fn find_cycles(&self) -> Vec<Vec<WaitNode>> {
        let mut roots: Vec<WaitNode> = self.edges.keys().copied().collect();
        roots.sort_unstable();

        let mut visited = FxHashSet::default();
        let mut on_stack = FxHashSet::default();
        let mut path = Vec::new();
        let mut cycles = Vec::new();

        for root in roots {
            if !visited.contains(&root) {
                self.dfs(root, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn dfs(
        &self,
        node: WaitNode,
        visited: &mut FxHashSet<WaitNode>,
        on_stack: &mut FxHashSet<WaitNode>,
        path: &mut Vec<WaitNode>,
        cycles: &mut Vec<Vec<WaitNode>>,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if on_stack.contains(&next) {
                    // Found a back edge; the cycle starts at next's first
                    // occurrence on the current path
                    if let Some(pos) = path.iter().position(|&n| n == next) {
                        cycles.push(path[pos..].to_vec());
                    }
                } else if !visited.contains(&next) {
                    self.dfs(next, visited, on_stack, path, cycles);
                }
            }
        }

        path.pop();
        on_stack.remove(&node);
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Flatten the adjacency into a serializable edge list
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut edges: Vec<(WaitNode, WaitNode)> = self
            .edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect();
        edges.sort_unstable();
        GraphSnapshot { edges }
    }
}
