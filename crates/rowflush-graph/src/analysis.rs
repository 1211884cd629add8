//! Depth-first analysis of a [`Graph`].
//!
//! The analysis walks the graph once (Cormen, Leiserson, Rivest) and records:
//!
//! - the kind of every edge: tree, back (target still on the walk stack) or
//!   forward (target already finished, which also covers cross edges),
//! - the cycle closed by each back edge, rebuilt from the current tree path,
//! - the cycle closed by a forward edge, if a bounded secondary search finds
//!   a path from the edge target back to its source,
//! - a finish time per node, used to produce the topological order.
//!
//! # Finish Times
//!
//! A node's finish time is one more than the largest finish time among the
//! targets of its tree and forward edges, or zero when it has none. Back
//! edges contribute nothing. Sorting by descending finish time therefore
//! places `from` ahead of `to` for every edge that is not a back edge.
//!
//! # Traversal
//!
//! The walk uses an explicit frame stack instead of recursion so that long
//! dependency chains cannot exhaust the thread stack. The tree path is a
//! `Vec` of edges that grows on descent and shrinks when a frame finishes.

use crate::graph::{EdgeId, Graph};
use petgraph::stable_graph::NodeIndex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{trace, warn};

/// Default budget of edge visits for one forward-edge cycle search.
pub const DEFAULT_FORWARD_SEARCH_LIMIT: usize = 10_000;

/// Classification assigned to an edge by the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The edge discovered its target.
    Tree,
    /// The target was still being visited; the edge closes a cycle.
    Back,
    /// The target was already finished.
    Forward,
}

/// Tuning knobs for [`DepthFirstAnalysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Maximum edge visits spent looking for a cycle through one forward
    /// edge. When exhausted the edge is treated as cycle-free.
    pub forward_search_limit: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            forward_search_limit: DEFAULT_FORWARD_SEARCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Position within the outgoing edges of one node.
struct Cursor {
    node: NodeIndex,
    edges: Vec<EdgeId>,
    next: usize,
}

impl Cursor {
    fn advance(&mut self) -> Option<EdgeId> {
        let edge = self.edges.get(self.next).copied();
        self.next += 1;
        edge
    }
}

struct Frame {
    cursor: Cursor,
    max_child: i64,
}

/// Result of a depth-first walk over a [`Graph`].
///
/// The analysis borrows the graph; drop it before mutating the graph (for
/// instance before removing the edges chosen to break a cycle).
pub struct DepthFirstAnalysis<'g, N, E> {
    graph: &'g Graph<N, E>,
    finished: Vec<i64>,
    kinds: HashMap<EdgeId, EdgeKind>,
    discovery: Vec<EdgeId>,
    cycles: HashMap<EdgeId, Vec<EdgeId>>,
    back_edges: Vec<EdgeId>,
    forward_edges: Vec<EdgeId>,
    sorted: Vec<N>,
}

impl<'g, N, E> DepthFirstAnalysis<'g, N, E>
where
    N: Copy + Eq + Hash + Debug,
{
    /// Analyze with default options; ties keep node insertion order.
    #[must_use]
    pub fn new(graph: &'g Graph<N, E>) -> Self {
        Self::with_options(graph, AnalysisOptions::default())
    }

    /// Analyze with explicit options; ties keep node insertion order.
    #[must_use]
    pub fn with_options(graph: &'g Graph<N, E>, options: AnalysisOptions) -> Self {
        Self::with_comparator(graph, options, |_, _| Ordering::Equal)
    }

    /// Analyze, breaking finish-time ties with `compare`.
    ///
    /// Nodes the comparator considers equal keep their insertion order.
    #[must_use]
    pub fn with_comparator<F>(
        graph: &'g Graph<N, E>,
        options: AnalysisOptions,
        mut compare: F,
    ) -> Self
    where
        F: FnMut(&N, &N) -> Ordering,
    {
        let mut walk = Walk::new(graph, options);
        let roots: Vec<NodeIndex> = graph.node_indices().collect();
        for root in roots {
            if walk.colors[root.index()] == Color::White {
                walk.visit(root);
            }
        }

        let mut order: Vec<NodeIndex> = graph.node_indices().collect();
        order.sort_by(|a, b| {
            walk.finished[b.index()]
                .cmp(&walk.finished[a.index()])
                .then_with(|| compare(&graph.key(*a), &graph.key(*b)))
        });
        let sorted = order.into_iter().map(|index| graph.key(index)).collect();

        Self {
            graph,
            finished: walk.finished,
            kinds: walk.kinds,
            discovery: walk.discovery,
            cycles: walk.cycles,
            back_edges: walk.back_edges,
            forward_edges: walk.forward_edges,
            sorted,
        }
    }

    /// The analyzed graph.
    #[must_use]
    pub fn graph(&self) -> &'g Graph<N, E> {
        self.graph
    }

    /// Nodes in topological order (descending finish time).
    #[must_use]
    pub fn sorted_nodes(&self) -> &[N] {
        &self.sorted
    }

    /// Finish time of a node, or `None` if the node is not in the graph.
    #[must_use]
    pub fn finish_time(&self, node: N) -> Option<i64> {
        self.graph
            .lookup(node)
            .and_then(|index| self.finished.get(index.index()).copied())
    }

    /// Classification of an edge, or `None` for an edge the walk never saw.
    #[must_use]
    pub fn edge_kind(&self, edge: EdgeId) -> Option<EdgeKind> {
        self.kinds.get(&edge).copied()
    }

    /// The cycle closed by `edge`, starting with `edge` itself.
    #[must_use]
    pub fn cycle(&self, edge: EdgeId) -> Option<&[EdgeId]> {
        self.cycles.get(&edge).map(Vec::as_slice)
    }

    /// Edges of the given kind, in the order the walk classified them.
    #[must_use]
    pub fn edges_of_kind(&self, kind: EdgeKind) -> Vec<EdgeId> {
        self.discovery
            .iter()
            .copied()
            .filter(|edge| self.kinds.get(edge) == Some(&kind))
            .collect()
    }

    /// Back edges in discovery order.
    #[must_use]
    pub fn back_edges(&self) -> &[EdgeId] {
        &self.back_edges
    }

    /// Forward edges in discovery order, with or without a cycle.
    #[must_use]
    pub fn forward_edges(&self) -> &[EdgeId] {
        &self.forward_edges
    }

    /// Every edge that closes a cycle with its cycle: back edges first, then
    /// forward edges whose secondary search found one.
    pub fn cycle_edges(&self) -> impl Iterator<Item = (EdgeId, &[EdgeId])> + '_ {
        self.back_edges
            .iter()
            .chain(self.forward_edges.iter())
            .filter_map(|edge| self.cycle(*edge).map(|cycle| (*edge, cycle)))
    }

    /// `true` when there are no back edges and no forward edge closes a cycle.
    #[must_use]
    pub fn has_no_cycles(&self) -> bool {
        self.back_edges.is_empty()
            && self
                .forward_edges
                .iter()
                .all(|edge| self.cycles.get(edge).is_none_or(Vec::is_empty))
    }
}

/// Mutable walk state, discarded once the analysis is assembled.
struct Walk<'g, N, E> {
    graph: &'g Graph<N, E>,
    options: AnalysisOptions,
    colors: Vec<Color>,
    finished: Vec<i64>,
    kinds: HashMap<EdgeId, EdgeKind>,
    discovery: Vec<EdgeId>,
    cycles: HashMap<EdgeId, Vec<EdgeId>>,
    back_edges: Vec<EdgeId>,
    forward_edges: Vec<EdgeId>,
}

impl<'g, N, E> Walk<'g, N, E>
where
    N: Copy + Eq + Hash + Debug,
{
    fn new(graph: &'g Graph<N, E>, options: AnalysisOptions) -> Self {
        let bound = graph.node_bound();
        Self {
            graph,
            options,
            colors: vec![Color::White; bound],
            finished: vec![-1; bound],
            kinds: HashMap::new(),
            discovery: Vec::new(),
            cycles: HashMap::new(),
            back_edges: Vec::new(),
            forward_edges: Vec::new(),
        }
    }

    fn enter(&mut self, node: NodeIndex) -> Frame {
        self.colors[node.index()] = Color::Gray;
        Frame {
            cursor: Cursor {
                node,
                edges: self.graph.outgoing(node),
                next: 0,
            },
            max_child: -1,
        }
    }

    fn classify(&mut self, edge: EdgeId, kind: EdgeKind) {
        self.kinds.insert(edge, kind);
        self.discovery.push(edge);
    }

    fn visit(&mut self, root: NodeIndex) {
        let mut path: Vec<EdgeId> = Vec::new();
        let mut stack = vec![self.enter(root)];

        while let Some(top) = stack.len().checked_sub(1) {
            let node = stack[top].cursor.node;
            let Some(edge) = stack[top].cursor.advance() else {
                let finish = stack[top].max_child + 1;
                stack.pop();
                self.finished[node.index()] = finish;
                self.colors[node.index()] = Color::Black;
                if let Some(parent) = stack.last_mut() {
                    parent.max_child = parent.max_child.max(finish);
                    path.pop();
                }
                continue;
            };
            let Some(other) = self.graph.target(edge) else {
                continue;
            };

            match self.colors[other.index()] {
                Color::White => {
                    self.classify(edge, EdgeKind::Tree);
                    path.push(edge);
                    let frame = self.enter(other);
                    stack.push(frame);
                }
                Color::Gray => {
                    self.classify(edge, EdgeKind::Back);
                    self.back_edges.push(edge);
                    let cycle = self.cycle_for_back_edge(edge, node, other, &path);
                    trace!(
                        from = ?self.graph.key(node),
                        to = ?self.graph.key(other),
                        length = cycle.len(),
                        "back edge closes cycle"
                    );
                    self.cycles.insert(edge, cycle);
                }
                Color::Black => {
                    self.classify(edge, EdgeKind::Forward);
                    self.forward_edges.push(edge);
                    let other_finish = self.finished[other.index()];
                    stack[top].max_child = stack[top].max_child.max(other_finish);
                    if let Some(cycle) = self.cycle_for_forward_edge(edge, other, node) {
                        trace!(
                            from = ?self.graph.key(node),
                            to = ?self.graph.key(other),
                            length = cycle.len(),
                            "forward edge closes cycle"
                        );
                        self.cycles.insert(edge, cycle);
                    }
                }
            }
        }
    }

    /// `edge` runs from `node` to the gray ancestor `other`. The cycle is the
    /// back edge followed by the tree path from `other` down to `node`.
    fn cycle_for_back_edge(
        &self,
        edge: EdgeId,
        node: NodeIndex,
        other: NodeIndex,
        path: &[EdgeId],
    ) -> Vec<EdgeId> {
        let mut cycle = vec![edge];
        if node == other {
            return cycle;
        }
        if let Some(start) = path
            .iter()
            .rposition(|&step| self.graph.source(step) == Some(other))
        {
            cycle.extend_from_slice(&path[start..]);
        }
        cycle
    }

    /// Look for a path from the finished node `start` back to `target`
    /// without reusing an edge already on the search path. Self-loops are
    /// skipped.
    fn cycle_for_forward_edge(
        &self,
        edge: EdgeId,
        start: NodeIndex,
        target: NodeIndex,
    ) -> Option<Vec<EdgeId>> {
        let limit = self.options.forward_search_limit;
        let mut visits = 0usize;
        let mut path: Vec<EdgeId> = Vec::new();
        let mut on_path: HashSet<EdgeId> = HashSet::new();
        let mut stack = vec![Cursor {
            node: start,
            edges: self.graph.outgoing(start),
            next: 0,
        }];

        while let Some(top) = stack.len().checked_sub(1) {
            let current = stack[top].node;
            let Some(candidate) = stack[top].advance() else {
                stack.pop();
                if let Some(step) = path.pop() {
                    on_path.remove(&step);
                }
                continue;
            };

            visits += 1;
            if visits > limit {
                warn!(
                    from = ?self.graph.key(target),
                    to = ?self.graph.key(start),
                    limit,
                    "forward edge cycle search exhausted its budget"
                );
                return None;
            }

            let Some(next) = self.graph.target(candidate) else {
                continue;
            };
            if next == current || on_path.contains(&candidate) {
                continue;
            }
            if next == target {
                let mut cycle = Vec::with_capacity(path.len() + 2);
                cycle.push(edge);
                cycle.extend_from_slice(&path);
                cycle.push(candidate);
                return Some(cycle);
            }

            path.push(candidate);
            on_path.insert(candidate);
            stack.push(Cursor {
                node: next,
                edges: self.graph.outgoing(next),
                next: 0,
            });
        }

        None
    }
}
