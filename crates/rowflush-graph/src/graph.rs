//! Directed multigraph keyed by opaque node values.
//!
//! Nodes are stored in a petgraph `StableDiGraph` and located through a
//! `HashMap` from node key to `NodeIndex`. Edge indices stay valid when
//! other edges are removed.

use crate::error::{Error, Result};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, NodeIndexable};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Identifier of an edge within one [`Graph`].
pub type EdgeId = EdgeIndex;

/// Borrowed view of a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeView<'a, N, E> {
    /// The edge identifier.
    pub id: EdgeId,
    /// Node that must come first.
    pub from: N,
    /// Node that must come after `from`.
    pub to: N,
    /// Payload recorded when the edge was added.
    pub weight: &'a E,
}

impl<N: PartialEq, E> EdgeView<'_, N, E> {
    /// Returns `true` if the edge starts and ends at the same node.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// A directed multigraph.
///
/// # Invariants
///
/// - Every key in `node_map` points at a live node whose weight is that key.
/// - Nodes are never removed, so node indices are dense and follow insertion
///   order.
/// - Parallel edges between the same pair of nodes are kept as distinct edges.
#[derive(Debug, Clone)]
pub struct Graph<N, E> {
    graph: StableDiGraph<N, E>,
    node_map: HashMap<N, NodeIndex>,
}

impl<N, E> Default for Graph<N, E>
where
    N: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> Graph<N, E>
where
    N: Copy + Eq + Hash + Debug,
{
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Add a node if it is not already present.
    ///
    /// Returns `true` if the node was inserted.
    pub fn add_node(&mut self, node: N) -> bool {
        if self.node_map.contains_key(&node) {
            return false;
        }
        let index = self.graph.add_node(node);
        self.node_map.insert(node, index);
        true
    }

    /// Add a directed edge `from -> to`, inserting either endpoint if needed.
    ///
    /// Adding the same pair twice produces two distinct edges.
    pub fn add_edge(&mut self, from: N, to: N, weight: E) -> EdgeId {
        self.add_node(from);
        self.add_node(to);
        let a = self.node_map[&from];
        let b = self.node_map[&to];
        self.graph.add_edge(a, b, weight)
    }

    /// Remove an edge, returning its payload.
    pub fn remove_edge(&mut self, edge: EdgeId) -> Option<E> {
        self.graph.remove_edge(edge)
    }

    /// Returns `true` if the node is part of the graph.
    #[must_use]
    pub fn contains_node(&self, node: N) -> bool {
        self.node_map.contains_key(&node)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All nodes, in the order they were first added.
    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.graph.node_indices().map(|index| self.graph[index])
    }

    /// Look up a live edge.
    #[must_use]
    pub fn edge(&self, edge: EdgeId) -> Option<EdgeView<'_, N, E>> {
        let (a, b) = self.graph.edge_endpoints(edge)?;
        let weight = self.graph.edge_weight(edge)?;
        Some(EdgeView {
            id: edge,
            from: self.graph[a],
            to: self.graph[b],
            weight,
        })
    }

    /// Edges leaving `node`, in insertion order.
    pub fn edges_from(&self, node: N) -> Result<Vec<EdgeId>> {
        let index = self.index_of(node)?;
        Ok(self.outgoing(index))
    }

    /// Edges arriving at `node`, in insertion order.
    pub fn edges_to(&self, node: N) -> Result<Vec<EdgeId>> {
        let index = self.index_of(node)?;
        let mut edges: Vec<EdgeId> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        edges.reverse();
        Ok(edges)
    }

    /// Parallel edges `from -> to`, in insertion order.
    pub fn edges_between(&self, from: N, to: N) -> Result<Vec<EdgeId>> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        Ok(self
            .outgoing(a)
            .into_iter()
            .filter(|&edge| self.graph.edge_endpoints(edge).is_some_and(|(_, t)| t == b))
            .collect())
    }

    fn index_of(&self, node: N) -> Result<NodeIndex> {
        self.node_map
            .get(&node)
            .copied()
            .ok_or_else(|| Error::UnknownNode(format!("{node:?}")))
    }

    // petgraph keeps adjacency lists newest-first.
    pub(crate) fn outgoing(&self, index: NodeIndex) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| edge.id())
            .collect();
        edges.reverse();
        edges
    }

    pub(crate) fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub(crate) fn node_bound(&self) -> usize {
        self.graph.node_bound()
    }

    pub(crate) fn key(&self, index: NodeIndex) -> N {
        self.graph[index]
    }

    pub(crate) fn lookup(&self, node: N) -> Option<NodeIndex> {
        self.node_map.get(&node).copied()
    }

    pub(crate) fn target(&self, edge: EdgeId) -> Option<NodeIndex> {
        self.graph.edge_endpoints(edge).map(|(_, to)| to)
    }

    pub(crate) fn source(&self, edge: EdgeId) -> Option<NodeIndex> {
        self.graph.edge_endpoints(edge).map(|(from, _)| from)
    }
}
