//! Weighted precedence graph over system nodes.
//!
//! Edges carry signed integer weights: positive weights are ordering
//! constraints ("must run before"), negative weights are denials ("must not
//! run before") that suppress weaker inherited constraints. Higher
//! magnitudes win; a strictly stronger edge clears the opposite direction.
//!
//! [`seal`](PrecedenceGraph::seal) is the irreversible transition from
//! mutable graph to schedule: it enumerates elementary cycles (Johnson's
//! algorithm over the positive-weight subgraph), erases spent denials,
//! computes reachability, performs a transitive reduction, and fixes the
//! topological order. Cycle detection reports *all* elementary cycles in
//! one error, shortest first.

use fixedbitset::FixedBitSet;

/// Error returned by [`PrecedenceGraph::seal`] when the positive-weight
/// subgraph contains at least one directed cycle.
#[derive(Debug)]
pub struct CycleError {
    /// Every elementary cycle, shortest first, as node names.
    pub cycles: Vec<Vec<String>>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.cycles.iter().map(|c| c.join("\u{2014}")).collect();
        if rendered.len() == 1 {
            write!(f, "Precedence cycle detected: {}", rendered[0])
        } else {
            write!(f, "Precedence cycles detected: {}", rendered.join("; "))
        }
    }
}

impl std::error::Error for CycleError {}

/// A directed graph of system nodes with signed-weight edges.
///
/// The node set is fixed at construction; `weights[i][j]` holds the signed
/// weight of edge `i → j`, zero meaning no edge. At most one edge exists in
/// each direction between any pair, and self-loops are silently ignored.
pub struct PrecedenceGraph {
    names: Vec<String>,
    weights: Vec<Vec<i32>>,
    sealed: bool,
    order: Vec<usize>,
}

impl PrecedenceGraph {
    /// Creates an edge-free graph over the named nodes.
    pub fn new(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            weights: vec![vec![0; n]; n],
            sealed: false,
            order: Vec::new(),
        }
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the name of a node.
    pub fn name(&self, node: usize) -> &str {
        &self.names[node]
    }

    /// Returns whether [`seal`](Self::seal) has run.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the signed weight of edge `from → to` (zero = no edge).
    pub fn weight(&self, from: usize, to: usize) -> i32 {
        self.weights[from][to]
    }

    /// Adds a precedence constraint: `from` must run before `to`.
    ///
    /// # Panics
    ///
    /// Panics if the graph is sealed or `weight` is not positive.
    pub fn add(&mut self, from: usize, to: usize, weight: i32) {
        assert!(weight > 0, "edge weight must be positive");
        self.insert(from, to, weight);
    }

    /// Adds a denial: `from` must *not* be ordered before `to`.
    ///
    /// Stored as a negative weight; erased during sealing after it has
    /// suppressed any weaker positive constraint.
    ///
    /// # Panics
    ///
    /// Panics if the graph is sealed or `weight` is not positive.
    pub fn deny(&mut self, from: usize, to: usize, weight: i32) {
        assert!(weight > 0, "denial weight must be positive");
        self.insert(from, to, -weight);
    }

    /// Applies the signed insertion rules.
    ///
    /// A call weaker than what is already known in either direction of the
    /// pair is a no-op; otherwise the edge is stored and a strictly weaker
    /// reverse edge is cleared. Equal-magnitude opposite edges may coexist
    /// until cycle detection surfaces them.
    fn insert(&mut self, from: usize, to: usize, weight: i32) {
        assert!(!self.sealed, "precedence graph mutated after seal");
        if from == to {
            return;
        }
        let current = self.weights[from][to];
        let reverse = self.weights[to][from];
        if weight.abs() < current.abs() || weight.abs() < reverse.abs() {
            return;
        }
        self.weights[from][to] = weight;
        if weight.abs() > reverse.abs() {
            self.weights[to][from] = 0;
        }
    }

    /// Seals the graph: cycle detection, denial erasure, transitive
    /// reduction, and topological ordering. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] listing every elementary cycle of the
    /// positive-weight subgraph, shortest first.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn seal(&mut self) -> Result<(), CycleError> {
        assert!(!self.sealed, "precedence graph sealed twice");

        let cycles = self.elementary_cycles();
        if !cycles.is_empty() {
            return Err(CycleError {
                cycles: cycles
                    .into_iter()
                    .map(|cycle| cycle.into_iter().map(|v| self.names[v].clone()).collect())
                    .collect(),
            });
        }

        // Denials have done their work suppressing weaker constraints.
        for row in &mut self.weights {
            for weight in row.iter_mut() {
                if *weight < 0 {
                    *weight = 0;
                }
            }
        }

        let paths = self.reachability();
        let n = self.len();
        for i in 0..n {
            for j in 0..n {
                if self.weights[i][j] <= 0 {
                    continue;
                }
                let redundant = (0..n)
                    .any(|k| k != i && k != j && paths[i].contains(k) && paths[k].contains(j));
                if redundant {
                    self.weights[i][j] = 0;
                }
            }
        }

        self.sealed = true;
        self.order = self.kahn();
        Ok(())
    }

    /// Returns the topological order fixed at seal time.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not sealed.
    pub fn order(&self) -> &[usize] {
        assert!(self.sealed, "topological order requested before seal");
        &self.order
    }

    /// Builds a new graph over `vertices`, keeping every edge whose
    /// endpoints are both in the set, denial signs included.
    ///
    /// If this graph is sealed, the induced graph is sealed too (with its
    /// own topological order over the kept nodes).
    pub fn induce_subgraph(&self, vertices: &[usize]) -> PrecedenceGraph {
        let names = vertices.iter().map(|&v| self.names[v].clone()).collect();
        let mut induced = PrecedenceGraph::new(names);
        for (i, &a) in vertices.iter().enumerate() {
            for (j, &b) in vertices.iter().enumerate() {
                induced.weights[i][j] = self.weights[a][b];
            }
        }
        induced.sealed = self.sealed;
        if induced.sealed {
            induced.order = induced.kahn();
        }
        induced
    }

    /// Reachability matrix of the positive-weight subgraph, one row bit-set
    /// per node, via the Floyd–Warshall triple loop.
    fn reachability(&self) -> Vec<FixedBitSet> {
        let n = self.len();
        let mut paths: Vec<FixedBitSet> = (0..n)
            .map(|i| {
                let mut row = FixedBitSet::with_capacity(n);
                for j in 0..n {
                    if self.weights[i][j] > 0 {
                        row.insert(j);
                    }
                }
                row
            })
            .collect();

        for k in 0..n {
            let row_k = paths[k].clone();
            for i in 0..n {
                if paths[i].contains(k) {
                    paths[i].union_with(&row_k);
                }
            }
        }
        paths
    }

    /// Kahn's algorithm over the reduced positive-edge graph.
    ///
    /// Ties break by ascending node id. A round without progress indicates
    /// a cycle, which cannot happen after a successful seal.
    fn kahn(&self) -> Vec<usize> {
        let n = self.len();
        let mut in_degrees = vec![0usize; n];
        for row in &self.weights {
            for (j, &weight) in row.iter().enumerate() {
                if weight > 0 {
                    in_degrees[j] += 1;
                }
            }
        }

        let mut emitted = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let next = (0..n).find(|&i| !emitted[i] && in_degrees[i] == 0);
            let Some(node) = next else {
                panic!("topological sort stalled on a sealed graph");
            };
            emitted[node] = true;
            order.push(node);
            for (j, &weight) in self.weights[node].iter().enumerate() {
                if weight > 0 {
                    in_degrees[j] -= 1;
                }
            }
        }
        order
    }

    /// Enumerates the elementary cycles of the positive-weight subgraph
    /// (Johnson's algorithm), shortest first.
    ///
    /// The outer loop walks start vertices ascending, each time extracting
    /// the least-indexed non-trivial strongly connected component of the
    /// remaining subgraph, clearing the blocked state for its vertices, and
    /// running the circuit search from its least vertex. It terminates once
    /// no remaining vertex has out-edges inside its component.
    fn elementary_cycles(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let adjacency: Vec<Vec<usize>> = (0..n)
            .map(|i| (0..n).filter(|&j| self.weights[i][j] > 0).collect())
            .collect();

        let mut cycles: Vec<Vec<usize>> = Vec::new();
        let mut blocked = vec![false; n];
        let mut block_lists: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut stack: Vec<usize> = Vec::new();

        let mut start = 0;
        while start < n {
            let Some(component) = least_nontrivial_scc(&adjacency, start) else {
                break;
            };
            let least = component.iter().copied().min().unwrap();
            let mut in_component = vec![false; n];
            for &v in &component {
                in_component[v] = true;
                blocked[v] = false;
                block_lists[v].clear();
            }
            circuit(
                least,
                least,
                &adjacency,
                &in_component,
                &mut blocked,
                &mut block_lists,
                &mut stack,
                &mut cycles,
            );
            start = least + 1;
        }

        cycles.sort_by_key(Vec::len);
        cycles
    }
}

/// Johnson's recursive circuit search. Returns whether any cycle through
/// `start` was found below `vertex`.
#[allow(clippy::too_many_arguments)]
fn circuit(
    vertex: usize,
    start: usize,
    adjacency: &[Vec<usize>],
    in_component: &[bool],
    blocked: &mut [bool],
    block_lists: &mut [Vec<usize>],
    stack: &mut Vec<usize>,
    cycles: &mut Vec<Vec<usize>>,
) -> bool {
    let mut found = false;
    stack.push(vertex);
    blocked[vertex] = true;

    for &next in &adjacency[vertex] {
        if !in_component[next] {
            continue;
        }
        if next == start {
            cycles.push(stack.clone());
            found = true;
        } else if !blocked[next]
            && circuit(
                next,
                start,
                adjacency,
                in_component,
                blocked,
                block_lists,
                stack,
                cycles,
            )
        {
            found = true;
        }
    }

    if found {
        unblock(vertex, blocked, block_lists);
    } else {
        // No cycle below this vertex: stay blocked until a predecessor on
        // the B-list unblocks.
        for &next in &adjacency[vertex] {
            if in_component[next] && !block_lists[next].contains(&vertex) {
                block_lists[next].push(vertex);
            }
        }
    }

    stack.pop();
    found
}

fn unblock(vertex: usize, blocked: &mut [bool], block_lists: &mut [Vec<usize>]) {
    blocked[vertex] = false;
    let pending = std::mem::take(&mut block_lists[vertex]);
    for v in pending {
        if blocked[v] {
            unblock(v, blocked, block_lists);
        }
    }
}

/// Among the strongly connected components of the subgraph over vertices
/// `>= from`, returns the non-trivial one containing the smallest vertex,
/// or `None` when only trivial components remain.
fn least_nontrivial_scc(adjacency: &[Vec<usize>], from: usize) -> Option<Vec<usize>> {
    strongly_connected_components(adjacency, from)
        .into_iter()
        .filter(|component| component.len() > 1)
        .min_by_key(|component| component.iter().copied().min().unwrap())
}

/// Iterative path-based strong-component algorithm over the subgraph
/// induced on vertices `>= from`.
fn strongly_connected_components(adjacency: &[Vec<usize>], from: usize) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = adjacency.len();
    let mut preorder = vec![UNVISITED; n];
    let mut assigned = vec![false; n];
    let mut counter = 0;
    let mut path: Vec<usize> = Vec::new();
    let mut boundary: Vec<usize> = Vec::new();
    let mut components = Vec::new();

    for root in from..n {
        if preorder[root] != UNVISITED {
            continue;
        }
        preorder[root] = counter;
        counter += 1;
        path.push(root);
        boundary.push(root);
        // Explicit call stack of (vertex, next edge index) frames.
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(&(vertex, edge)) = frames.last() {
            if edge < adjacency[vertex].len() {
                frames.last_mut().unwrap().1 += 1;
                let next = adjacency[vertex][edge];
                if next < from {
                    continue;
                }
                if preorder[next] == UNVISITED {
                    preorder[next] = counter;
                    counter += 1;
                    path.push(next);
                    boundary.push(next);
                    frames.push((next, 0));
                } else if !assigned[next] {
                    while preorder[*boundary.last().unwrap()] > preorder[next] {
                        boundary.pop();
                    }
                }
            } else {
                frames.pop();
                if boundary.last() == Some(&vertex) {
                    boundary.pop();
                    let mut component = Vec::new();
                    loop {
                        let v = path.pop().unwrap();
                        assigned[v] = true;
                        component.push(v);
                        if v == vertex {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize) -> PrecedenceGraph {
        PrecedenceGraph::new((0..n).map(|i| format!("S{i}")).collect())
    }

    // ---- Insertion rules ----

    #[test]
    fn add_stores_weight() {
        let mut g = graph(2);
        g.add(0, 1, 3);
        assert_eq!(g.weight(0, 1), 3);
        assert_eq!(g.weight(1, 0), 0);
    }

    #[test]
    fn deny_stores_negative() {
        let mut g = graph(2);
        g.deny(0, 1, 3);
        assert_eq!(g.weight(0, 1), -3);
    }

    #[test]
    fn self_edge_is_ignored() {
        let mut g = graph(2);
        g.add(0, 0, 5);
        assert_eq!(g.weight(0, 0), 0);
    }

    #[test]
    fn weaker_add_is_noop() {
        let mut g = graph(2);
        g.add(0, 1, 5);
        g.add(0, 1, 2);
        assert_eq!(g.weight(0, 1), 5);
    }

    #[test]
    fn stronger_add_overrides() {
        let mut g = graph(2);
        g.add(0, 1, 2);
        g.add(0, 1, 5);
        assert_eq!(g.weight(0, 1), 5);
    }

    #[test]
    fn weight_dominance_law() {
        // add(A,B,5); add(B,A,10) — only the stronger direction survives.
        let mut g = graph(2);
        g.add(0, 1, 5);
        g.add(1, 0, 10);
        assert_eq!(g.weight(0, 1), 0);
        assert_eq!(g.weight(1, 0), 10);
    }

    #[test]
    fn denial_idempotence_law() {
        // deny(A,B,w) then a weaker add leaves no positive edge A→B.
        let mut g = graph(2);
        g.deny(0, 1, 2);
        g.add(0, 1, 1);
        assert_eq!(g.weight(0, 1), -2);

        g.seal().unwrap();
        assert_eq!(g.weight(0, 1), 0);
    }

    #[test]
    fn equal_magnitude_opposites_coexist() {
        let mut g = graph(2);
        g.add(0, 1, 5);
        g.add(1, 0, 5);
        assert_eq!(g.weight(0, 1), 5);
        assert_eq!(g.weight(1, 0), 5);

        // ... and the subsequent seal surfaces them as a cycle.
        let err = g.seal().unwrap_err();
        assert_eq!(err.cycles.len(), 1);
    }

    #[test]
    fn denial_override_clears_pair() {
        // add A→B weight 1, deny A→B weight 2: no edge survives the seal.
        let mut g = graph(2);
        g.add(0, 1, 1);
        g.deny(0, 1, 2);
        g.seal().unwrap();
        assert_eq!(g.weight(0, 1), 0);
        assert_eq!(g.weight(1, 0), 0);
    }

    #[test]
    #[should_panic(expected = "mutated after seal")]
    fn add_after_seal_panics() {
        let mut g = graph(2);
        g.seal().unwrap();
        g.add(0, 1, 1);
    }

    #[test]
    #[should_panic(expected = "sealed twice")]
    fn double_seal_panics() {
        let mut g = graph(1);
        g.seal().unwrap();
        let _ = g.seal();
    }

    // ---- Cycle detection ----

    #[test]
    fn three_node_cycle_named() {
        let mut g = PrecedenceGraph::new(vec!["A".into(), "B".into(), "C".into()]);
        g.add(0, 1, 4);
        g.add(1, 2, 4);
        g.add(2, 0, 4);

        let err = g.seal().unwrap_err();
        assert_eq!(err.cycles, vec![vec!["A", "B", "C"]]);
        assert!(err.to_string().contains("A\u{2014}B\u{2014}C"));
    }

    #[test]
    fn all_cycles_reported_shortest_first() {
        // Two cycles: 0↔1 (length 2) and 0→1→2→0 (length 3).
        let mut g = graph(3);
        g.add(0, 1, 4);
        g.add(1, 0, 4);
        g.add(1, 2, 4);
        g.add(2, 0, 4);

        let err = g.seal().unwrap_err();
        assert_eq!(err.cycles.len(), 2);
        assert_eq!(err.cycles[0].len(), 2);
        assert_eq!(err.cycles[1].len(), 3);
    }

    #[test]
    fn disjoint_cycles_all_found() {
        let mut g = graph(4);
        g.add(0, 1, 4);
        g.add(1, 0, 4);
        g.add(2, 3, 4);
        g.add(3, 2, 4);

        let err = g.seal().unwrap_err();
        assert_eq!(err.cycles.len(), 2);
    }

    #[test]
    fn denial_edges_do_not_create_cycles() {
        // A→B positive plus B→A denial is not a cycle.
        let mut g = graph(2);
        g.add(0, 1, 2);
        g.deny(1, 0, 2);
        assert!(g.seal().is_ok());
        assert_eq!(g.weight(0, 1), 2);
    }

    #[test]
    fn acyclic_graph_seals() {
        let mut g = graph(3);
        g.add(0, 1, 1);
        g.add(1, 2, 1);
        assert!(g.seal().is_ok());
    }

    #[test]
    fn empty_graph_seals() {
        let mut g = graph(0);
        assert!(g.seal().is_ok());
        assert!(g.order().is_empty());
    }

    // ---- Transitive reduction ----

    #[test]
    fn triangle_reduces() {
        // A→B, B→C, A→C: the shortcut A→C is removed; order is [A, B, C].
        let mut g = graph(3);
        g.add(0, 1, 4);
        g.add(1, 2, 4);
        g.add(0, 2, 4);
        g.seal().unwrap();

        assert_eq!(g.weight(0, 1), 4);
        assert_eq!(g.weight(1, 2), 4);
        assert_eq!(g.weight(0, 2), 0);
        assert_eq!(g.order(), &[0, 1, 2]);
    }

    #[test]
    fn reduction_keeps_diamond_edges() {
        // 0→1, 0→2, 1→3, 2→3: nothing is redundant.
        let mut g = graph(4);
        g.add(0, 1, 1);
        g.add(0, 2, 1);
        g.add(1, 3, 1);
        g.add(2, 3, 1);
        g.seal().unwrap();

        assert_eq!(g.weight(0, 1), 1);
        assert_eq!(g.weight(0, 2), 1);
        assert_eq!(g.weight(1, 3), 1);
        assert_eq!(g.weight(2, 3), 1);
    }

    #[test]
    fn reduction_is_minimal() {
        // Chain with every shortcut: only consecutive edges survive.
        let n = 5;
        let mut g = graph(n);
        for i in 0..n {
            for j in (i + 1)..n {
                g.add(i, j, 1);
            }
        }
        g.seal().unwrap();

        for i in 0..n {
            for j in 0..n {
                if j == i + 1 {
                    assert_eq!(g.weight(i, j), 1, "chain edge {i}→{j} must survive");
                } else {
                    assert_eq!(g.weight(i, j), 0, "edge {i}→{j} should be reduced");
                }
            }
        }
    }

    // ---- Topological order ----

    #[test]
    fn order_respects_edges() {
        let mut g = graph(4);
        g.add(2, 0, 1);
        g.add(0, 3, 1);
        g.add(2, 1, 1);
        g.seal().unwrap();

        let order = g.order();
        let position = |v: usize| order.iter().position(|&x| x == v).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                if g.weight(i, j) > 0 {
                    assert!(position(i) < position(j));
                }
            }
        }
    }

    #[test]
    fn order_ties_break_ascending() {
        let mut g = graph(3);
        g.seal().unwrap();
        assert_eq!(g.order(), &[0, 1, 2]);
    }

    // ---- Subgraph induction ----

    #[test]
    fn induced_subgraph_keeps_inner_edges() {
        let mut g = graph(4);
        g.add(0, 1, 3);
        g.add(1, 2, 3);
        g.deny(3, 1, 2);
        g.add(0, 3, 1);

        let sub = g.induce_subgraph(&[0, 1, 3]);
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.weight(0, 1), 3); // 0→1 survives
        assert_eq!(sub.weight(2, 1), -2); // denial 3→1 survives with its sign
        assert_eq!(sub.weight(0, 2), 1); // 0→3 survives
        assert!(!sub.is_sealed());
    }

    #[test]
    fn induced_subgraph_drops_outside_edges() {
        let mut g = graph(3);
        g.add(0, 1, 1);
        g.add(1, 2, 1);

        let sub = g.induce_subgraph(&[0, 2]);
        assert_eq!(sub.weight(0, 1), 0);
    }

    #[test]
    fn induced_subgraph_inherits_seal() {
        let mut g = graph(3);
        g.add(0, 1, 1);
        g.add(1, 2, 1);
        g.seal().unwrap();

        let sub = g.induce_subgraph(&[0, 2]);
        assert!(sub.is_sealed());
        assert_eq!(sub.order(), &[0, 1]);
    }

    // ---- Internals ----

    #[test]
    fn scc_finds_components() {
        // 0→1→0 is one component; 2 is trivial.
        let adjacency = vec![vec![1], vec![0], vec![0]];
        let components = strongly_connected_components(&adjacency, 0);
        let nontrivial: Vec<_> = components.iter().filter(|c| c.len() > 1).collect();
        assert_eq!(nontrivial.len(), 1);
        let mut component = nontrivial[0].clone();
        component.sort_unstable();
        assert_eq!(component, vec![0, 1]);
    }

    #[test]
    fn scc_respects_from_bound() {
        // Restricting to vertices >= 1 severs the 0↔1 cycle.
        let adjacency = vec![vec![1], vec![0], vec![]];
        let components = strongly_connected_components(&adjacency, 1);
        assert!(components.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn long_chain_cycle_found() {
        let n = 12;
        let mut g = graph(n);
        for i in 0..n {
            g.add(i, (i + 1) % n, 1);
        }
        let err = g.seal().unwrap_err();
        assert_eq!(err.cycles.len(), 1);
        assert_eq!(err.cycles[0].len(), n);
    }

    #[test]
    fn cycle_error_display_plural() {
        let err = CycleError {
            cycles: vec![
                vec!["A".into(), "B".into()],
                vec!["C".into(), "D".into(), "E".into()],
            ],
        };
        let message = err.to_string();
        assert!(message.contains("A\u{2014}B"));
        assert!(message.contains("C\u{2014}D\u{2014}E"));
    }
}
