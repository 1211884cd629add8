//! Error types for graph operations.

use thiserror::Error;

/// The error type for graph queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node is not a member of the graph.
    #[error("node not in graph: {0}")]
    UnknownNode(String),
}

/// A specialized Result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
