//! Dependency graph construction.
//!
//! Turns the pending inserts, updates and deletes of a [`ChangeSet`] into two
//! graphs whose edges `from -> to` mean "`from` executes before `to`":
//!
//! - The **delete graph** orders deletes against each other, and deletes
//!   against inserts that reuse a deleted key. Once any delete precedes an
//!   insert, pending inserts and updates are ordered inside this graph too.
//! - The **insert graph** orders inserts that reference other pending inserts
//!   when no delete interacts with them.
//!
//! Rows that touch no edge belong to neither graph and flush in the unordered
//! phases.

use crate::change_set::ChangeSet;
use crate::row::{ForeignKeyValue, KeyValue, RelationValue, RowAction, RowId};
use crate::schema::{ColumnId, ForeignKeyId, Schema, TableId};
use rowflush_graph::Graph;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Column that creates a dependency and can be deferred to break a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeCause {
    /// A foreign key constraint.
    ForeignKey(ForeignKeyId),
    /// A relation-id column.
    RelationColumn(ColumnId),
}

/// Payload of a dependency graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// A column on `holder` references the row at the other end of the edge.
    Constraint {
        /// Column creating the dependency.
        cause: EdgeCause,
        /// Row whose statement sets the column.
        holder: RowId,
    },
    /// A deleted row's primary key is reused by a new row. Nothing can be
    /// deferred to break such an edge.
    KeyReuse,
}

impl Dependency {
    /// The column behind the edge, if any.
    #[must_use]
    pub fn cause(&self) -> Option<EdgeCause> {
        match self {
            Self::Constraint { cause, .. } => Some(*cause),
            Self::KeyReuse => None,
        }
    }

    /// The row that sets the column behind the edge, if any.
    #[must_use]
    pub fn holder(&self) -> Option<RowId> {
        match self {
            Self::Constraint { holder, .. } => Some(*holder),
            Self::KeyReuse => None,
        }
    }
}

/// Graph over change-set rows.
pub type FlushGraph = Graph<RowId, Dependency>;

/// The two graphs of one flush. Either may be empty.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphs {
    /// Inserts ordered against inserts.
    pub insert: FlushGraph,
    /// Deletes, plus the inserts and updates sequenced with them.
    pub delete: FlushGraph,
}

type Edge = (RowId, RowId, Dependency);

/// Builds [`DependencyGraphs`] from a change set.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'s> {
    schema: &'s Schema,
}

impl<'s> GraphBuilder<'s> {
    /// Create a builder that resolves constraints against `schema`.
    #[must_use]
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Build both graphs and mark every row that joins one as dependent.
    ///
    /// Invalidated rows are ignored.
    pub fn build(&self, changes: &mut ChangeSet) -> DependencyGraphs {
        let mut graphs = DependencyGraphs::default();

        let delete_edges = self.delete_edges(changes);
        let ignore_updates = !delete_edges
            .iter()
            .any(|(_, _, dependency)| *dependency == Dependency::KeyReuse);
        link(changes, &mut graphs.delete, delete_edges);

        if ignore_updates {
            let edges = self.insert_edges(changes, changes.inserts());
            link(changes, &mut graphs.insert, edges);
        } else {
            let updates = self.insert_edges(changes, changes.updates());
            link(changes, &mut graphs.delete, updates);
            let inserts = self.insert_edges(changes, changes.inserts());
            link(changes, &mut graphs.delete, inserts);
        }

        debug!(
            insert_nodes = graphs.insert.node_count(),
            insert_edges = graphs.insert.edge_count(),
            delete_nodes = graphs.delete.node_count(),
            delete_edges = graphs.delete.edge_count(),
            "built dependency graphs"
        );
        graphs
    }

    /// Edges between deletes, and from deletes to inserts reusing their key.
    fn delete_edges(&self, changes: &ChangeSet) -> Vec<Edge> {
        let reuse = if changes.deletes().is_empty() || changes.inserts().is_empty() {
            HashMap::new()
        } else {
            rows_by_key(changes, changes.inserts())
        };
        let deleted = rows_by_key(changes, changes.deletes());

        let mut edges = Vec::new();
        for &delete in changes.deletes() {
            let Some(row) = changes.row(delete).filter(|row| row.is_valid()) else {
                continue;
            };

            if let Some(key) = row.object().and_then(|o| changes.keys().get(o))
                && let Some(&insert) = reuse.get(&(row.table(), key.clone()))
            {
                edges.push((delete, insert, Dependency::KeyReuse));
            }

            for fk in self.schema.foreign_keys_on(row.table()) {
                let Some(value) = row.foreign_key(fk.id) else {
                    continue;
                };
                if let Some(other) =
                    pending(changes, &deleted, fk.references, value, RowAction::Delete)
                    && other != delete
                {
                    edges.push((
                        delete,
                        other,
                        Dependency::Constraint {
                            cause: EdgeCause::ForeignKey(fk.id),
                            holder: delete,
                        },
                    ));
                }
            }
        }
        edges
    }

    /// Edges from pending inserts to the rows in `rows` that reference them.
    fn insert_edges(&self, changes: &ChangeSet, rows: &[RowId]) -> Vec<Edge> {
        let inserted = rows_by_key(changes, changes.inserts());
        let mut edges = Vec::new();
        for &id in rows {
            let Some(row) = changes.row(id).filter(|row| row.is_valid()) else {
                continue;
            };

            for (fk_id, value) in row.foreign_keys() {
                let Some(fk) = self.schema.foreign_key(fk_id) else {
                    continue;
                };
                let Some(referenced) =
                    pending(changes, &inserted, fk.references, value, RowAction::Insert)
                else {
                    continue;
                };
                // An immediate self reference is satisfied within one statement.
                if referenced != id || !fk.is_immediate() {
                    edges.push((
                        referenced,
                        id,
                        Dependency::Constraint {
                            cause: EdgeCause::ForeignKey(fk_id),
                            holder: id,
                        },
                    ));
                }
            }

            for (column, value) in row.relation_ids() {
                let RelationValue::Object { table, object } = value else {
                    continue;
                };
                let base = self.schema.base_table(*table);
                let Some(referenced) = changes.find(base, *object, RowAction::Insert) else {
                    continue;
                };
                // A self reference with a known key is written within one statement.
                if referenced == id && changes.keys().contains(*object) {
                    continue;
                }
                edges.push((
                    referenced,
                    id,
                    Dependency::Constraint {
                        cause: EdgeCause::RelationColumn(column),
                        holder: id,
                    },
                ));
            }
        }
        edges
    }
}

/// Valid rows of `rows` by table and already-known key. The first row wins.
fn rows_by_key(changes: &ChangeSet, rows: &[RowId]) -> HashMap<(TableId, KeyValue), RowId> {
    let mut by_key = HashMap::new();
    for &id in rows {
        let Some(row) = changes.row(id).filter(|row| row.is_valid()) else {
            continue;
        };
        if let Some(key) = row.object().and_then(|o| changes.keys().get(o)) {
            by_key.entry((row.table(), key.clone())).or_insert(id);
        }
    }
    by_key
}

/// The pending `action` row a foreign key value points at, by object
/// identity or by literal key.
fn pending(
    changes: &ChangeSet,
    by_key: &HashMap<(TableId, KeyValue), RowId>,
    table: TableId,
    value: &ForeignKeyValue,
    action: RowAction,
) -> Option<RowId> {
    match value {
        ForeignKeyValue::Null => None,
        ForeignKeyValue::Object(object) => changes.find(table, *object, action),
        ForeignKeyValue::Key(key) => by_key.get(&(table, key.clone())).copied(),
    }
}

fn link(changes: &mut ChangeSet, graph: &mut FlushGraph, edges: Vec<Edge>) {
    for (from, to, dependency) in edges {
        trace!(from = %from, to = %to, ?dependency, "adding dependency");
        graph.add_edge(from, to, dependency);
        for id in [from, to] {
            if let Some(row) = changes.row_mut(id) {
                row.set_dependent(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{ObjectId, RowOp};
    use crate::schema::NewForeignKey;

    struct Fixture {
        schema: Schema,
        parent: TableId,
        child: TableId,
        fk_parent: ForeignKeyId,
    }

    fn fixture() -> Fixture {
        let mut schema = Schema::new();
        let parent = schema.add_table("parent");
        let child = schema.add_table("child");
        let fk_parent = schema.add_foreign_key(NewForeignKey::new("fk_parent", child, parent));
        Fixture {
            schema,
            parent,
            child,
            fk_parent,
        }
    }

    fn edge_list(graph: &FlushGraph) -> Vec<(RowId, RowId, Dependency)> {
        let mut edges = Vec::new();
        for node in graph.nodes() {
            for id in graph.edges_from(node).unwrap() {
                let view = graph.edge(id).unwrap();
                edges.push((view.from, view.to, *view.weight));
            }
        }
        edges
    }

    #[test]
    fn referencing_insert_follows_referenced_insert() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        let a = changes.add(RowOp::insert(f.parent, ObjectId(1)));
        let b = changes.add(
            RowOp::insert(f.child, ObjectId(2))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(1))),
        );
        let loner = changes.add(RowOp::insert(f.parent, ObjectId(3)));

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.insert),
            vec![(
                a,
                b,
                Dependency::Constraint {
                    cause: EdgeCause::ForeignKey(f.fk_parent),
                    holder: b,
                }
            )]
        );
        assert!(graphs.delete.is_empty());
        assert!(changes.row(a).unwrap().is_dependent());
        assert!(changes.row(b).unwrap().is_dependent());
        assert!(!changes.row(loner).unwrap().is_dependent());
        assert!(!graphs.insert.contains_node(loner));
    }

    #[test]
    fn immediate_self_reference_needs_no_edge_but_deferred_does() {
        let mut schema = Schema::new();
        let node = schema.add_table("node");
        let strict = schema.add_foreign_key(NewForeignKey::new("fk_self", node, node));
        let lazy = schema.add_foreign_key(NewForeignKey::new("fk_lazy", node, node).deferred());
        let mut changes = ChangeSet::new();
        let row = changes.add(
            RowOp::insert(node, ObjectId(1))
                .with_foreign_key(strict, ForeignKeyValue::Object(ObjectId(1)))
                .with_foreign_key(lazy, ForeignKeyValue::Object(ObjectId(1))),
        );

        let graphs = GraphBuilder::new(&schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.insert),
            vec![(
                row,
                row,
                Dependency::Constraint {
                    cause: EdgeCause::ForeignKey(lazy),
                    holder: row,
                }
            )]
        );
    }

    #[test]
    fn delete_referencing_another_delete_goes_first() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        let parent = changes.add(RowOp::delete(f.parent, ObjectId(1)));
        let child = changes.add(
            RowOp::delete(f.child, ObjectId(2))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(1))),
        );

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.delete),
            vec![(
                child,
                parent,
                Dependency::Constraint {
                    cause: EdgeCause::ForeignKey(f.fk_parent),
                    holder: child,
                }
            )]
        );
        assert!(graphs.insert.is_empty());
    }

    #[test]
    fn literal_key_orders_against_the_insert_holding_it() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        changes.assign_key(ObjectId(1), KeyValue::Int(5));
        let child = changes.add(
            RowOp::insert(f.child, ObjectId(2))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Key(KeyValue::Int(5))),
        );
        let parent = changes.add(RowOp::insert(f.parent, ObjectId(1)));
        let stranger = changes.add(
            RowOp::insert(f.child, ObjectId(3))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Key(KeyValue::Int(6))),
        );

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.insert),
            vec![(
                parent,
                child,
                Dependency::Constraint {
                    cause: EdgeCause::ForeignKey(f.fk_parent),
                    holder: child,
                }
            )]
        );
        assert!(!changes.row(stranger).unwrap().is_dependent());
    }

    #[test]
    fn delete_holding_a_literal_key_goes_before_the_referenced_delete() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        changes.assign_key(ObjectId(1), KeyValue::Int(1));
        let parent = changes.add(RowOp::delete(f.parent, ObjectId(1)));
        let child = changes.add(
            RowOp::delete(f.child, ObjectId(2))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Key(KeyValue::Int(1))),
        );

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.delete),
            vec![(
                child,
                parent,
                Dependency::Constraint {
                    cause: EdgeCause::ForeignKey(f.fk_parent),
                    holder: child,
                }
            )]
        );
    }

    #[test]
    fn reused_key_moves_inserts_and_updates_into_the_delete_graph() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        changes.assign_key(ObjectId(1), KeyValue::Int(7));
        changes.assign_key(ObjectId(2), KeyValue::Int(7));
        let old = changes.add(RowOp::delete(f.parent, ObjectId(1)));
        let new = changes.add(RowOp::insert(f.parent, ObjectId(2)));
        let child = changes.add(
            RowOp::insert(f.child, ObjectId(3))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(2))),
        );
        let update = changes.add(
            RowOp::update(f.child, ObjectId(4))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(2))),
        );

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert!(graphs.insert.is_empty());
        let edges = edge_list(&graphs.delete);
        assert!(edges.contains(&(old, new, Dependency::KeyReuse)));
        assert!(edges.iter().any(|&(from, to, _)| from == new && to == child));
        assert!(edges.iter().any(|&(from, to, _)| from == new && to == update));
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn updates_stay_out_of_the_insert_graph() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        changes.add(RowOp::insert(f.parent, ObjectId(1)));
        let update = changes.add(
            RowOp::update(f.child, ObjectId(2))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(1))),
        );

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        assert!(graphs.insert.is_empty());
        assert!(graphs.delete.is_empty());
        assert!(!changes.row(update).unwrap().is_dependent());
    }

    #[test]
    fn relation_id_orders_against_the_base_table_insert() {
        let mut schema = Schema::new();
        let entity = schema.add_table("entity");
        let person = schema.add_subtable("person", entity);
        let audit = schema.add_table("audit");
        let subject = schema.add_relation_column("subject_id", audit, true);
        let mut changes = ChangeSet::new();
        let base = changes.add(RowOp::insert(entity, ObjectId(1)));
        changes.add(RowOp::insert(person, ObjectId(1)));
        let entry = changes.add(RowOp::insert(audit, ObjectId(2)).with_relation_id(
            subject,
            RelationValue::Object {
                table: person,
                object: ObjectId(1),
            },
        ));

        let graphs = GraphBuilder::new(&schema).build(&mut changes);

        assert_eq!(
            edge_list(&graphs.insert),
            vec![(
                base,
                entry,
                Dependency::Constraint {
                    cause: EdgeCause::RelationColumn(subject),
                    holder: entry,
                }
            )]
        );
    }

    #[test]
    fn invalidated_rows_are_ignored() {
        let f = fixture();
        let mut changes = ChangeSet::new();
        changes.add(RowOp::insert(f.parent, ObjectId(1)));
        let first = changes.add(RowOp::insert(f.child, ObjectId(2)));
        let second = changes.add(
            RowOp::insert(f.child, ObjectId(3))
                .with_foreign_key(f.fk_parent, ForeignKeyValue::Object(ObjectId(1))),
        );
        changes.merge(first, second).unwrap();

        let graphs = GraphBuilder::new(&f.schema).build(&mut changes);

        // The surviving row now carries the reference.
        assert_eq!(graphs.insert.edge_count(), 1);
        assert!(graphs.insert.contains_node(first));
        assert!(!graphs.insert.contains_node(second));
    }
}
