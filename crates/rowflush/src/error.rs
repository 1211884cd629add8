//! Error types for flush operations.
//!
//! Errors fall into two groups:
//!
//! - **`FatalFlushError`**: a broken internal invariant. The flush stops
//!   immediately and most rows are never attempted.
//! - **`RowExecutionError`**: a single row the statement executor rejected.
//!   These are collected and the flush carries on with the remaining rows.
//!
//! Callers can therefore tell "the flush did not run" apart from "some rows
//! individually failed".

use crate::row::{RowAction, RowId};
use crate::schema::TableId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for operations that can abort a flush.
pub type Result<T> = std::result::Result<T, FatalFlushError>;

/// Unrecoverable fault that aborts the whole flush.
#[derive(Debug, Error)]
pub enum FatalFlushError {
    /// A back edge has no foreign key or relation column behind it, so
    /// there is nothing to defer.
    #[error("dependency cycle through row {from} -> row {to} has no constraint to break")]
    UncausedBackEdge {
        /// Row at the start of the back edge.
        from: RowId,
        /// Row at the end of the back edge.
        to: RowId,
    },

    /// A cycle patch has no primary key to put in its WHERE clause.
    #[error("row {row} on table {table} has no primary key to anchor a cycle patch")]
    UnassignedPrimaryKey {
        /// Row that should have been patched.
        row: RowId,
        /// Table of that row.
        table: TableId,
    },

    /// Every link of a cycle is NOT NULL.
    #[error("no nullable foreign key in a dependency cycle of {length} link(s)")]
    NoNullableLink {
        /// Number of edges in the cycle.
        length: usize,
    },

    /// Cycles kept reappearing after the configured number of passes.
    #[error("dependency cycles remain after {passes} resolution pass(es)")]
    UnresolvedCycle {
        /// Passes attempted.
        passes: usize,
    },

    /// A row id does not belong to the change set.
    #[error("row {0} is not in the change set")]
    UnknownRow(RowId),

    /// Graph query failed.
    #[error("graph error: {0}")]
    Graph(#[from] rowflush_graph::Error),
}

/// Error raised while assembling a change set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChangeSetError {
    /// A row id does not belong to the change set.
    #[error("row {0} is not in the change set")]
    UnknownRow(RowId),

    /// The row was already merged away.
    #[error("row {0} is no longer valid")]
    InvalidRow(RowId),

    /// Only rows on the same table can be merged.
    #[error("cannot merge row {from} into row {into}: tables differ")]
    TableMismatch {
        /// Row that would absorb the values.
        into: RowId,
        /// Row that would be invalidated.
        from: RowId,
    },
}

/// Error loading or validating a [`FlushConfig`](crate::config::FlushConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error while reading or writing the file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML could not be parsed or produced.
    #[error("YAML error: {0}")]
    Yaml(String),

    /// A setting is out of range.
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Category of a per-row failure.
///
/// Uses a 4xx/5xx style split:
/// - Data problems the caller can fix (constraint and key violations)
/// - Problems with the flush itself or the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    // === Data Problems ===
    /// A foreign key or other constraint rejected the row.
    ConstraintViolation,

    /// An insert reused a primary key that already exists.
    DuplicateKey,

    /// An update or delete found no row to act on.
    MissingRow,

    // === Flush/Backend Problems ===
    /// The row was not attempted because a row it depends on failed.
    Skipped,

    /// The backend failed for a reason unrelated to the data.
    Backend,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstraintViolation => write!(f, "constraint violation"),
            Self::DuplicateKey => write!(f, "duplicate key"),
            Self::MissingRow => write!(f, "missing row"),
            Self::Skipped => write!(f, "skipped"),
            Self::Backend => write!(f, "backend error"),
        }
    }
}

impl ExecutionErrorKind {
    /// Returns `true` if the failure comes from the data being flushed.
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::ConstraintViolation | Self::DuplicateKey | Self::MissingRow
        )
    }
}

/// Failure reported by a statement executor for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// Category of the failure.
    pub kind: ExecutionErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RowFailure {
    /// Create a failure.
    #[must_use]
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A constraint rejected the row.
    #[must_use]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::ConstraintViolation, message)
    }

    /// A backend failure unrelated to the row data.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Backend, message)
    }
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// A row the executor rejected, collected during the flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowExecutionError {
    /// The rejected row, or `None` for a failure of the final batch flush.
    pub row: Option<RowId>,
    /// Table the row targets.
    pub table: Option<TableId>,
    /// Operation kind of the row.
    pub action: Option<RowAction>,
    /// Category of the failure.
    pub kind: ExecutionErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RowExecutionError {
    /// Attribute an executor failure to a row.
    #[must_use]
    pub fn for_row(row: RowId, table: TableId, action: RowAction, failure: RowFailure) -> Self {
        Self {
            row: Some(row),
            table: Some(table),
            action: Some(action),
            kind: failure.kind,
            message: failure.message,
        }
    }

    /// A failure of the final batch flush, not tied to one row.
    #[must_use]
    pub fn for_batch(failure: RowFailure) -> Self {
        Self {
            row: None,
            table: None,
            action: None,
            kind: failure.kind,
            message: failure.message,
        }
    }
}

impl fmt::Display for RowExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.row, self.table, self.action) {
            (Some(row), Some(table), Some(action)) => write!(
                f,
                "{action} of row {row} on table {table}: {} ({})",
                self.message, self.kind
            ),
            _ => write!(f, "batch flush: {} ({})", self.message, self.kind),
        }
    }
}

impl std::error::Error for RowExecutionError {}
