//! Constraint-aware flush ordering.
//!
//! Given the rows a transaction inserts, updates and deletes, `rowflush`
//! finds an execution order that satisfies every foreign key, and breaks
//! foreign key cycles by deferring one nullable column per cycle to a patch
//! update.
//!
//! # Overview
//!
//! - [`Schema`] describes tables, foreign keys, relation-id columns and
//!   joined inheritance.
//! - [`ChangeSet`] holds the pending [`RowOp`]s of one flush, plus the
//!   [`KeyRegistry`] of primary keys already known.
//! - [`GraphBuilder`] turns a change set into insert and delete dependency
//!   graphs.
//! - [`FlushOrchestrator`] breaks cycles, then executes every row in a fixed
//!   phase order through a [`StatementExecutor`].
//!
//! # Errors
//!
//! A flush either fails outright with a [`FatalFlushError`], or completes
//! and returns a [`FlushOutcome`] listing each [`RowExecutionError`] the
//! executor reported.
//!
//! # Example
//!
//! ```
//! use rowflush::{
//!     ChangeSet, FlushOrchestrator, ForeignKeyValue, KeyRegistry, KeyValue, NewForeignKey,
//!     ObjectId, RowFailure, RowOp, Schema, StatementExecutor,
//! };
//!
//! struct Counter(i64);
//!
//! impl StatementExecutor for Counter {
//!     fn execute(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<Option<KeyValue>, RowFailure> {
//!         match row.object() {
//!             Some(object) if !keys.contains(object) => {
//!                 self.0 += 1;
//!                 Ok(Some(KeyValue::Int(self.0)))
//!             }
//!             _ => Ok(None),
//!         }
//!     }
//! }
//!
//! let mut schema = Schema::new();
//! let author = schema.add_table("author");
//! let book = schema.add_table("book");
//! let written_by = schema.add_foreign_key(NewForeignKey::new("fk_author", book, author));
//!
//! let mut changes = ChangeSet::new();
//! changes.add(
//!     RowOp::insert(book, ObjectId(2))
//!         .with_foreign_key(written_by, ForeignKeyValue::Object(ObjectId(1))),
//! );
//! changes.add(RowOp::insert(author, ObjectId(1)));
//!
//! let outcome = FlushOrchestrator::with_defaults(schema)
//!     .flush(&mut changes, &mut Counter(0))
//!     .unwrap();
//! assert!(outcome.is_success());
//! assert_eq!(changes.keys().get(ObjectId(1)), Some(&KeyValue::Int(1)));
//! ```

#![forbid(unsafe_code)]

pub mod builder;
pub mod change_set;
pub mod config;
pub mod error;
pub mod executor;
pub mod flush;
pub mod keys;
pub mod row;
pub mod schema;

pub use builder::{Dependency, DependencyGraphs, EdgeCause, FlushGraph, GraphBuilder};
pub use change_set::ChangeSet;
pub use config::{DEFAULT_MAX_RESOLUTION_PASSES, FlushConfig};
pub use error::{
    ChangeSetError, ConfigError, ExecutionErrorKind, FatalFlushError, Result, RowExecutionError,
    RowFailure,
};
pub use executor::StatementExecutor;
pub use flush::{FlushOrchestrator, FlushOutcome};
pub use keys::KeyRegistry;
pub use row::{
    ForeignKeyValue, KeyValue, ObjectId, RelationValue, RowAction, RowId, RowOp, RowOrigin,
    RowScope,
};
pub use schema::{
    ColumnId, ForeignKey, ForeignKeyId, NewForeignKey, RelationColumn, Schema, Table, TableId,
};
