//! Directed multigraph and depth-first analysis for dependency ordering.
//!
//! This crate provides the two leaf components of the flush ordering engine:
//!
//! - [`Graph`]: a directed multigraph of opaque, copyable node keys. Parallel
//!   edges are kept; every edge carries its own payload.
//! - [`DepthFirstAnalysis`]: classifies every edge as tree, back or forward,
//!   reconstructs the cycle closed by back edges (and by forward edges that
//!   happen to close one), and produces a topological order from finish times.
//!
//! # Edge Direction
//!
//! An edge `from -> to` means `from` must come before `to`. The sorted node
//! list returned by [`DepthFirstAnalysis::sorted_nodes`] honors this for every
//! non-back edge.
//!
//! # Example
//!
//! ```
//! use rowflush_graph::{DepthFirstAnalysis, Graph};
//!
//! let mut graph: Graph<u32, &str> = Graph::new();
//! graph.add_edge(1, 2, "1 before 2");
//! graph.add_edge(2, 3, "2 before 3");
//!
//! let analysis = DepthFirstAnalysis::new(&graph);
//! assert!(analysis.has_no_cycles());
//! assert_eq!(analysis.sorted_nodes(), &[1, 2, 3]);
//! ```

#![forbid(unsafe_code)]

pub mod analysis;
pub mod error;
pub mod graph;

pub use analysis::{AnalysisOptions, DepthFirstAnalysis, EdgeKind, DEFAULT_FORWARD_SEARCH_LIMIT};
pub use error::{Error, Result};
pub use graph::{EdgeId, EdgeView, Graph};
