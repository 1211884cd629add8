//! Boundary to whatever turns row operations into statements.

use crate::error::RowFailure;
use crate::keys::KeyRegistry;
use crate::row::{KeyValue, RowOp};

/// Executes row operations in the order the orchestrator chooses.
///
/// Implementations resolve foreign key values and WHERE clauses through
/// `keys`, which already holds the key of every object inserted earlier in
/// the flush.
pub trait StatementExecutor {
    /// Execute one row operation now.
    ///
    /// For an insert whose object has no known key, return the generated
    /// key so later rows can reference it. Return `Ok(None)` otherwise.
    fn execute(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<Option<KeyValue>, RowFailure>;

    /// Flush statements buffered by earlier [`execute`](Self::execute) calls.
    /// Called once after every phase has run.
    fn flush_batch(&mut self) -> Result<(), RowFailure> {
        Ok(())
    }
}
