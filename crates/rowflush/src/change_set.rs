//! The pending rows of one flush.
//!
//! [`ChangeSet`] is an arena: rows are addressed by [`RowId`], never removed,
//! and invalidated instead when merged into another row. Each row is also
//! filed into exactly one collection according to its scope and action,
//! which is what the flush phases iterate.

use crate::error::ChangeSetError;
use crate::keys::KeyRegistry;
use crate::row::{KeyValue, ObjectId, RowAction, RowId, RowOp, RowScope};
use crate::schema::TableId;
use std::collections::HashMap;
use tracing::debug;

type RowKey = (TableId, ObjectId, RowAction);

/// Rows to flush, plus the keys known for their objects.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    rows: Vec<RowOp>,
    keys: KeyRegistry,
    index: HashMap<RowKey, RowId>,
    inserts: Vec<RowId>,
    updates: Vec<RowId>,
    deletes: Vec<RowId>,
    secondary_deletes: Vec<RowId>,
    secondary_updates: Vec<RowId>,
    all_row_deletes: Vec<RowId>,
    all_row_updates: Vec<RowId>,
    patches: Vec<RowId>,
}

impl ChangeSet {
    /// Create an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row.
    ///
    /// An update of an object that already has a pending insert or update on
    /// the same table is merged into that row, and the surviving row's id is
    /// returned. The update itself stays in the arena, invalidated.
    pub fn add(&mut self, row: RowOp) -> RowId {
        let id = RowId(self.rows.len());
        let absorb_into = match (row.scope(), row.action(), row.object()) {
            (RowScope::Primary, RowAction::Update, Some(object)) => self
                .find(row.table(), object, RowAction::Insert)
                .or_else(|| self.find(row.table(), object, RowAction::Update)),
            _ => None,
        };

        self.file(id, &row);
        let key = match row.scope() {
            RowScope::Primary => row.object().map(|o| (row.table(), o, row.action())),
            _ => None,
        };
        self.rows.push(row);

        if let Some(into) = absorb_into {
            debug!(row = %id, into = %into, "merging update into pending row");
            self.absorb(into, id);
            return into;
        }
        if let Some(key) = key {
            self.index.entry(key).or_insert(id);
        }
        id
    }

    /// Fold the values of `from` into `into` and invalidate `from`.
    pub fn merge(&mut self, into: RowId, from: RowId) -> Result<(), ChangeSetError> {
        let target = self.row(into).ok_or(ChangeSetError::UnknownRow(into))?;
        let donor = self.row(from).ok_or(ChangeSetError::UnknownRow(from))?;
        if !target.is_valid() {
            return Err(ChangeSetError::InvalidRow(into));
        }
        if !donor.is_valid() || into == from {
            return Err(ChangeSetError::InvalidRow(from));
        }
        if target.table() != donor.table() {
            return Err(ChangeSetError::TableMismatch { into, from });
        }
        self.absorb(into, from);
        Ok(())
    }

    fn absorb(&mut self, into: RowId, from: RowId) {
        let donor = self.rows[from.0].retire();
        self.rows[into.0].merge(donor);
        self.index.retain(|_, row| *row != from);
    }

    fn file(&mut self, id: RowId, row: &RowOp) {
        let collection = match (row.scope(), row.action()) {
            (RowScope::Primary, RowAction::Insert) => &mut self.inserts,
            (RowScope::Primary, RowAction::Update) => &mut self.updates,
            (RowScope::Primary, RowAction::Delete) => &mut self.deletes,
            (RowScope::Secondary, RowAction::Delete) => &mut self.secondary_deletes,
            (RowScope::Secondary, _) => &mut self.secondary_updates,
            (RowScope::AllRows, RowAction::Delete) => &mut self.all_row_deletes,
            (RowScope::AllRows, _) => &mut self.all_row_updates,
        };
        collection.push(id);
    }

    /// Add a cycle patch. Patches belong to no collection; the orchestrator
    /// schedules them itself.
    pub(crate) fn push_patch(&mut self, row: RowOp) -> RowId {
        let id = RowId(self.rows.len());
        self.rows.push(row);
        self.patches.push(id);
        id
    }

    /// Record the key of `object`.
    pub fn assign_key(&mut self, object: ObjectId, key: KeyValue) {
        self.keys.assign(object, key);
    }

    /// Known keys.
    #[must_use]
    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// Mutable access to the known keys.
    pub fn keys_mut(&mut self) -> &mut KeyRegistry {
        &mut self.keys
    }

    /// Look up a row.
    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&RowOp> {
        self.rows.get(id.0)
    }

    /// Look up a row for modification.
    pub fn row_mut(&mut self, id: RowId) -> Option<&mut RowOp> {
        self.rows.get_mut(id.0)
    }

    /// The valid primary row performing `action` on the row of `object` in
    /// `table`.
    #[must_use]
    pub fn find(&self, table: TableId, object: ObjectId, action: RowAction) -> Option<RowId> {
        self.index
            .get(&(table, object, action))
            .copied()
            .filter(|id| self.rows[id.0].is_valid())
    }

    /// Every row including invalidated ones and patches, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &RowOp)> + '_ {
        self.rows.iter().enumerate().map(|(i, row)| (RowId(i), row))
    }

    /// Number of rows including invalidated ones and patches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if no row was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Primary inserts.
    #[must_use]
    pub fn inserts(&self) -> &[RowId] {
        &self.inserts
    }

    /// Primary updates.
    #[must_use]
    pub fn updates(&self) -> &[RowId] {
        &self.updates
    }

    /// Primary deletes.
    #[must_use]
    pub fn deletes(&self) -> &[RowId] {
        &self.deletes
    }

    /// Deletes of secondary-table rows.
    #[must_use]
    pub fn secondary_deletes(&self) -> &[RowId] {
        &self.secondary_deletes
    }

    /// Inserts and updates of secondary-table rows.
    #[must_use]
    pub fn secondary_updates(&self) -> &[RowId] {
        &self.secondary_updates
    }

    /// Whole-table deletes.
    #[must_use]
    pub fn all_row_deletes(&self) -> &[RowId] {
        &self.all_row_deletes
    }

    /// Whole-table updates.
    #[must_use]
    pub fn all_row_updates(&self) -> &[RowId] {
        &self.all_row_updates
    }

    /// Cycle patches created by earlier flushes of this change set.
    #[must_use]
    pub fn patches(&self) -> &[RowId] {
        &self.patches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ForeignKeyValue;
    use crate::schema::ForeignKeyId;
    use rstest::rstest;

    const T: TableId = TableId(0);
    const U: TableId = TableId(1);
    const FK: ForeignKeyId = ForeignKeyId(0);

    #[rstest]
    #[case::insert(RowOp::insert(T, ObjectId(1)), 0)]
    #[case::update(RowOp::update(T, ObjectId(1)), 1)]
    #[case::delete(RowOp::delete(T, ObjectId(1)), 2)]
    #[case::secondary_delete(RowOp::secondary(T, RowAction::Delete, ObjectId(1)), 3)]
    #[case::secondary_insert(RowOp::secondary(T, RowAction::Insert, ObjectId(1)), 4)]
    #[case::secondary_update(RowOp::secondary(T, RowAction::Update, ObjectId(1)), 4)]
    #[case::delete_all(RowOp::delete_all(T), 5)]
    #[case::update_all(RowOp::update_all(T), 6)]
    fn rows_are_filed_by_scope_and_action(#[case] row: RowOp, #[case] collection: usize) {
        let mut changes = ChangeSet::new();
        let id = changes.add(row);

        let collections = [
            changes.inserts(),
            changes.updates(),
            changes.deletes(),
            changes.secondary_deletes(),
            changes.secondary_updates(),
            changes.all_row_deletes(),
            changes.all_row_updates(),
        ];
        for (i, ids) in collections.iter().enumerate() {
            assert_eq!(ids.contains(&id), i == collection, "collection {i}");
        }
    }

    #[test]
    fn update_merges_into_pending_insert() {
        let mut changes = ChangeSet::new();
        let insert = changes.add(RowOp::insert(T, ObjectId(1)));

        let survivor = changes.add(
            RowOp::update(T, ObjectId(1)).with_foreign_key(FK, ForeignKeyValue::Object(ObjectId(2))),
        );

        assert_eq!(survivor, insert);
        assert_eq!(changes.len(), 2);
        let update = RowId(1);
        assert!(!changes.row(update).unwrap().is_valid());
        assert_eq!(
            changes.row(insert).unwrap().foreign_key(FK),
            Some(&ForeignKeyValue::Object(ObjectId(2)))
        );
        assert_eq!(changes.find(T, ObjectId(1), RowAction::Update), None);
    }

    #[test]
    fn update_on_another_table_is_not_merged() {
        let mut changes = ChangeSet::new();
        changes.add(RowOp::insert(T, ObjectId(1)));

        let update = changes.add(RowOp::update(U, ObjectId(1)));

        assert!(changes.row(update).unwrap().is_valid());
        assert_eq!(changes.find(U, ObjectId(1), RowAction::Update), Some(update));
    }

    #[test]
    fn explicit_merge_invalidates_the_donor() {
        let mut changes = ChangeSet::new();
        let into = changes.add(RowOp::delete(T, ObjectId(1)));
        let from = changes.add(RowOp::delete(T, ObjectId(2)));

        changes.merge(into, from).unwrap();

        assert!(!changes.row(from).unwrap().is_valid());
        assert_eq!(changes.find(T, ObjectId(2), RowAction::Delete), None);
        assert_eq!(changes.merge(into, from), Err(ChangeSetError::InvalidRow(from)));
    }

    #[test]
    fn merge_rejects_rows_on_different_tables() {
        let mut changes = ChangeSet::new();
        let into = changes.add(RowOp::delete(T, ObjectId(1)));
        let from = changes.add(RowOp::delete(U, ObjectId(1)));

        assert_eq!(
            changes.merge(into, from),
            Err(ChangeSetError::TableMismatch { into, from })
        );
        assert_eq!(
            changes.merge(into, RowId(9)),
            Err(ChangeSetError::UnknownRow(RowId(9)))
        );
    }
}
