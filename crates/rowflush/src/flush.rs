//! Cycle-breaking flush orchestration.
//!
//! [`FlushOrchestrator::flush`] drives one change set through a fixed phase
//! order:
//!
//! 1. Secondary-table deletes
//! 2. Whole-table deletes
//! 3. Whole-table updates
//! 4. Insert graph, in topological order
//! 5. Inserts, then updates, that joined no graph
//! 6. Delete graph, in topological order
//! 7. Deletes that joined no graph
//! 8. Secondary-table inserts and updates
//!
//! followed by one [`StatementExecutor::flush_batch`] call.
//!
//! Before a graph runs, every cycle in it is broken by deferring one
//! nullable column. The row holding the column loses it, and a patch update
//! on the same row takes it over:
//!
//! - If the holder is a delete, the patch sets the column to NULL and runs
//!   before the graph, so the reference is gone before either row is deleted.
//! - Otherwise the patch carries the original value and runs after the
//!   graph, once the referenced row exists.

use crate::builder::{Dependency, EdgeCause, FlushGraph, GraphBuilder};
use crate::change_set::ChangeSet;
use crate::config::FlushConfig;
use crate::error::{
    ConfigError, ExecutionErrorKind, FatalFlushError, Result, RowExecutionError, RowFailure,
};
use crate::executor::StatementExecutor;
use crate::row::{ForeignKeyValue, RelationValue, RowAction, RowId};
use crate::schema::Schema;
use rowflush_graph::{DepthFirstAnalysis, EdgeId, EdgeKind};
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

/// What a flush did. Returned whenever the flush ran to completion, even if
/// individual rows failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Rows the executor rejected, in execution order.
    pub errors: Vec<RowExecutionError>,
    /// Rows the executor accepted, patches included.
    pub executed: usize,
    /// Cycle patches created.
    pub patches: usize,
    /// Dependency edges removed to break cycles.
    pub cycles_broken: usize,
}

impl FlushOutcome {
    /// Returns `true` if every row succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Orders and executes change sets against one schema.
#[derive(Debug, Clone)]
pub struct FlushOrchestrator {
    schema: Schema,
    config: FlushConfig,
}

impl FlushOrchestrator {
    /// Create an orchestrator, rejecting an invalid configuration.
    pub fn new(schema: Schema, config: FlushConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { schema, config })
    }

    /// Create an orchestrator with the default configuration.
    #[must_use]
    pub fn with_defaults(schema: Schema) -> Self {
        Self {
            schema,
            config: FlushConfig::default(),
        }
    }

    /// The schema rows are resolved against.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Execute every valid row of `changes` through `executor`.
    ///
    /// Rows the executor rejects are collected in the outcome and the flush
    /// carries on. A fatal error stops the flush where it is.
    ///
    /// # Errors
    ///
    /// Returns a [`FatalFlushError`] when a cycle cannot be broken or a
    /// cycle patch has no key to anchor on.
    pub fn flush<X>(&self, changes: &mut ChangeSet, executor: &mut X) -> Result<FlushOutcome>
    where
        X: StatementExecutor + ?Sized,
    {
        let mut run = FlushRun {
            schema: &self.schema,
            config: &self.config,
            changes,
            executor,
            outcome: FlushOutcome::default(),
            failed: HashSet::new(),
        };

        run.phase("secondary deletes", ChangeSet::secondary_deletes)?;
        run.phase("table deletes", ChangeSet::all_row_deletes)?;
        run.phase("table updates", ChangeSet::all_row_updates)?;

        let graphs = GraphBuilder::new(run.schema).build(run.changes);
        run.flush_graph("insert graph", graphs.insert)?;
        run.phase("inserts", ChangeSet::inserts)?;
        run.phase("updates", ChangeSet::updates)?;
        run.flush_graph("delete graph", graphs.delete)?;
        run.phase("deletes", ChangeSet::deletes)?;
        run.phase("secondary inserts and updates", ChangeSet::secondary_updates)?;

        if let Err(failure) = run.executor.flush_batch() {
            warn!(error = %failure, "batch flush failed");
            run.outcome.errors.push(RowExecutionError::for_batch(failure));
        }

        let outcome = run.outcome;
        info!(
            executed = outcome.executed,
            errors = outcome.errors.len(),
            patches = outcome.patches,
            cycles_broken = outcome.cycles_broken,
            "flush complete"
        );
        Ok(outcome)
    }
}

/// A patch row and the row whose column it took over.
#[derive(Debug, Clone, Copy)]
struct Patch {
    row: RowId,
    holder: RowId,
}

#[derive(Debug, Default)]
struct Patches {
    before: Vec<Patch>,
    after: Vec<Patch>,
}

/// State of one flush in progress.
struct FlushRun<'a, X: ?Sized> {
    schema: &'a Schema,
    config: &'a FlushConfig,
    changes: &'a mut ChangeSet,
    executor: &'a mut X,
    outcome: FlushOutcome,
    failed: HashSet<RowId>,
}

impl<X> FlushRun<'_, X>
where
    X: StatementExecutor + ?Sized,
{
    /// Execute the valid rows of one collection that joined no graph.
    fn phase(&mut self, name: &str, rows: fn(&ChangeSet) -> &[RowId]) -> Result<()> {
        let ids: Vec<RowId> = rows(&*self.changes)
            .iter()
            .copied()
            .filter(|&id| {
                self.changes
                    .row(id)
                    .is_some_and(|row| row.is_valid() && !row.is_dependent())
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        debug!(phase = name, rows = ids.len(), "running phase");
        for id in ids {
            self.execute_row(id)?;
        }
        Ok(())
    }

    fn flush_graph(&mut self, name: &str, mut graph: FlushGraph) -> Result<()> {
        if graph.is_empty() {
            return Ok(());
        }
        debug!(
            phase = name,
            rows = graph.node_count(),
            edges = graph.edge_count(),
            "running graph"
        );

        let mut patches = Patches::default();
        let order = self.resolve_cycles(&mut graph, &mut patches)?;

        for patch in patches.before {
            self.execute_patch(patch)?;
        }
        for id in order {
            if self.changes.row(id).is_some_and(|row| row.is_valid()) {
                self.execute_row(id)?;
            }
        }
        for patch in patches.after {
            self.execute_patch(patch)?;
        }
        Ok(())
    }

    /// Break cycles until the graph is acyclic and return its order.
    fn resolve_cycles(&mut self, graph: &mut FlushGraph, patches: &mut Patches) -> Result<Vec<RowId>> {
        let options = self.config.analysis_options();
        let max_passes = self.config.max_resolution_passes;

        for pass in 0..=max_passes {
            let links = {
                let analysis = DepthFirstAnalysis::with_comparator(&*graph, options, |a, b| a.cmp(b));
                if analysis.has_no_cycles() {
                    return Ok(analysis.sorted_nodes().to_vec());
                }
                if pass == max_passes {
                    break;
                }
                self.choose_links(&analysis)?
            };

            for link in links {
                let endpoints = graph.edge(link).map(|view| (view.from, view.to));
                let Some(dependency) = graph.remove_edge(link) else {
                    continue;
                };
                if let (Some((from, to)), Some(cause)) = (endpoints, dependency.cause()) {
                    debug!(from = %from, to = %to, ?cause, "breaking dependency cycle");
                }
                self.defer(dependency, patches)?;
                self.outcome.cycles_broken += 1;
            }
        }

        Err(FatalFlushError::UnresolvedCycle { passes: max_passes })
    }

    /// Pick one link to remove from each cycle not already broken.
    fn choose_links(&self, analysis: &DepthFirstAnalysis<'_, RowId, Dependency>) -> Result<Vec<EdgeId>> {
        let graph = analysis.graph();
        let mut chosen: Vec<EdgeId> = Vec::new();

        for (edge, cycle) in analysis.cycle_edges() {
            if cycle.is_empty() {
                continue;
            }
            if analysis.edge_kind(edge) == Some(EdgeKind::Back)
                && let Some(view) = graph.edge(edge)
                && view.weight.cause().is_none()
            {
                return Err(FatalFlushError::UncausedBackEdge {
                    from: view.from,
                    to: view.to,
                });
            }
            if cycle.iter().any(|link| chosen.contains(link)) {
                continue;
            }

            let link = self
                .breakable_link(graph, cycle)
                .ok_or(FatalFlushError::NoNullableLink {
                    length: cycle.len(),
                })?;
            chosen.push(link);
        }
        Ok(chosen)
    }

    /// First link of `cycle` whose column accepts NULL, or when allowed the
    /// first link with any column.
    fn breakable_link(&self, graph: &FlushGraph, cycle: &[EdgeId]) -> Option<EdgeId> {
        let cause = |edge: EdgeId| graph.edge(edge).and_then(|view| view.weight.cause());

        cycle
            .iter()
            .copied()
            .find(|&edge| cause(edge).is_some_and(|c| self.is_nullable(c)))
            .or_else(|| {
                if self.config.break_non_nullable {
                    cycle.iter().copied().find(|&edge| cause(edge).is_some())
                } else {
                    None
                }
            })
    }

    fn is_nullable(&self, cause: EdgeCause) -> bool {
        match cause {
            EdgeCause::ForeignKey(fk) => self.schema.foreign_key(fk).is_some_and(|fk| fk.nullable),
            EdgeCause::RelationColumn(column) => self
                .schema
                .relation_column(column)
                .is_some_and(|column| column.nullable),
        }
    }

    /// Move the column behind a removed edge into a patch on its holder.
    fn defer(&mut self, dependency: Dependency, patches: &mut Patches) -> Result<()> {
        let Dependency::Constraint { cause, holder } = dependency else {
            return Ok(());
        };
        let row = self
            .changes
            .row(holder)
            .ok_or(FatalFlushError::UnknownRow(holder))?;
        let mut patch = row.cycle_patch();

        if row.action() == RowAction::Delete {
            match cause {
                EdgeCause::ForeignKey(fk) => patch.set_foreign_key(fk, ForeignKeyValue::Null),
                EdgeCause::RelationColumn(column) => {
                    patch.set_relation_id(column, RelationValue::Null);
                }
            }
            let id = self.changes.push_patch(patch);
            patches.before.push(Patch { row: id, holder });
        } else {
            if row.object().is_none() {
                return Err(FatalFlushError::UnassignedPrimaryKey {
                    row: holder,
                    table: row.table(),
                });
            }
            let row = self
                .changes
                .row_mut(holder)
                .ok_or(FatalFlushError::UnknownRow(holder))?;
            let moved = match cause {
                EdgeCause::ForeignKey(fk) => row
                    .clear_foreign_key(fk)
                    .map(|value| patch.set_foreign_key(fk, value)),
                EdgeCause::RelationColumn(column) => row
                    .clear_relation_id(column)
                    .map(|value| patch.set_relation_id(column, value)),
            };
            if moved.is_none() {
                return Ok(());
            }
            let id = self.changes.push_patch(patch);
            patches.after.push(Patch { row: id, holder });
        }

        self.outcome.patches += 1;
        Ok(())
    }

    fn execute_patch(&mut self, patch: Patch) -> Result<()> {
        let row = self
            .changes
            .row(patch.row)
            .ok_or(FatalFlushError::UnknownRow(patch.row))?;
        let table = row.table();

        if self.failed.contains(&patch.holder) {
            let failure = RowFailure::new(
                ExecutionErrorKind::Skipped,
                format!("row {} it patches failed", patch.holder),
            );
            self.outcome
                .errors
                .push(RowExecutionError::for_row(patch.row, table, RowAction::Update, failure));
            self.failed.insert(patch.row);
            return Ok(());
        }

        match row.object() {
            Some(object) if self.changes.keys().contains(object) => self.execute_row(patch.row),
            _ => Err(FatalFlushError::UnassignedPrimaryKey {
                row: patch.holder,
                table,
            }),
        }
    }

    fn execute_row(&mut self, id: RowId) -> Result<()> {
        let row = self.changes.row(id).ok_or(FatalFlushError::UnknownRow(id))?;
        let (table, action, object) = (row.table(), row.action(), row.object());
        trace!(row = %id, %action, %table, "executing row");

        match self.executor.execute(row, self.changes.keys()) {
            Ok(generated) => {
                self.outcome.executed += 1;
                if let (Some(key), Some(object)) = (generated, object) {
                    self.changes.assign_key(object, key);
                }
            }
            Err(failure) => {
                warn!(row = %id, %action, %table, error = %failure, "row failed");
                self.outcome
                    .errors
                    .push(RowExecutionError::for_row(id, table, action, failure));
                self.failed.insert(id);
            }
        }
        Ok(())
    }
}
