//! Pending row operations.
//!
//! A [`RowOp`] is one change to one table row: an insert, an update or a
//! delete. Foreign key and relation-id values point at the persistent object
//! they reference rather than at a key, because the referenced key may only
//! be generated while the flush runs.

use crate::schema::{ColumnId, ForeignKeyId, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable index of a row within its [`ChangeSet`](crate::ChangeSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a persistent object. One object may own rows on several
/// tables (joined inheritance, secondary tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// A primary key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
    /// Integer key, usually generated.
    Int(i64),
    /// Text key, usually application-assigned.
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
        }
    }
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    /// New row.
    Insert,
    /// Change to an existing row.
    Update,
    /// Removal of an existing row.
    Delete,
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Which flush collection a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowScope {
    /// The row of one object on one of its primary tables. Only these rows
    /// take part in dependency graphs.
    Primary,
    /// A row on a secondary table. Never referenced by foreign keys.
    Secondary,
    /// A statement over a whole table rather than one object's row.
    AllRows,
}

/// Value of a foreign key on a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForeignKeyValue {
    /// Set the columns to NULL.
    Null,
    /// Reference the row of a persistent object; its key is resolved when
    /// the statement runs.
    Object(ObjectId),
    /// Reference a row by a literal key.
    Key(KeyValue),
}

/// Value of a relation-id column on a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationValue {
    /// Set the column to NULL.
    Null,
    /// Store the identity of `object`, whose most-derived table is `table`.
    Object {
        /// Most-derived table of the referenced object.
        table: TableId,
        /// The referenced object.
        object: ObjectId,
    },
}

/// Where a shadow update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowOrigin {
    /// Produced by the application's change tracking.
    Pending,
    /// Synthesized to break a dependency cycle.
    CyclePatch,
}

/// One pending change to one table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOp {
    table: TableId,
    action: RowAction,
    scope: RowScope,
    object: Option<ObjectId>,
    foreign_keys: BTreeMap<ForeignKeyId, ForeignKeyValue>,
    relation_ids: BTreeMap<ColumnId, RelationValue>,
    valid: bool,
    dependent: bool,
    origin: RowOrigin,
}

impl RowOp {
    fn new(table: TableId, action: RowAction, scope: RowScope, object: Option<ObjectId>) -> Self {
        Self {
            table,
            action,
            scope,
            object,
            foreign_keys: BTreeMap::new(),
            relation_ids: BTreeMap::new(),
            valid: true,
            dependent: false,
            origin: RowOrigin::Pending,
        }
    }

    /// Insert the row of `object` on `table`.
    #[must_use]
    pub fn insert(table: TableId, object: ObjectId) -> Self {
        Self::new(table, RowAction::Insert, RowScope::Primary, Some(object))
    }

    /// Update the row of `object` on `table`.
    #[must_use]
    pub fn update(table: TableId, object: ObjectId) -> Self {
        Self::new(table, RowAction::Update, RowScope::Primary, Some(object))
    }

    /// Delete the row of `object` on `table`.
    #[must_use]
    pub fn delete(table: TableId, object: ObjectId) -> Self {
        Self::new(table, RowAction::Delete, RowScope::Primary, Some(object))
    }

    /// A change to the secondary-table row of `object`.
    #[must_use]
    pub fn secondary(table: TableId, action: RowAction, object: ObjectId) -> Self {
        Self::new(table, action, RowScope::Secondary, Some(object))
    }

    /// Delete every row of `table`.
    #[must_use]
    pub fn delete_all(table: TableId) -> Self {
        Self::new(table, RowAction::Delete, RowScope::AllRows, None)
    }

    /// Update every row of `table`.
    #[must_use]
    pub fn update_all(table: TableId) -> Self {
        Self::new(table, RowAction::Update, RowScope::AllRows, None)
    }

    /// Builder form of [`set_foreign_key`](Self::set_foreign_key).
    #[must_use]
    pub fn with_foreign_key(mut self, fk: ForeignKeyId, value: ForeignKeyValue) -> Self {
        self.set_foreign_key(fk, value);
        self
    }

    /// Builder form of [`set_relation_id`](Self::set_relation_id).
    #[must_use]
    pub fn with_relation_id(mut self, column: ColumnId, value: RelationValue) -> Self {
        self.set_relation_id(column, value);
        self
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Kind of change.
    #[must_use]
    pub fn action(&self) -> RowAction {
        self.action
    }

    /// Flush collection the row belongs to.
    #[must_use]
    pub fn scope(&self) -> RowScope {
        self.scope
    }

    /// Object whose row this is; `None` for whole-table statements.
    #[must_use]
    pub fn object(&self) -> Option<ObjectId> {
        self.object
    }

    /// Whether the row was produced by tracking or by cycle breaking.
    #[must_use]
    pub fn origin(&self) -> RowOrigin {
        self.origin
    }

    /// `false` once the row has been merged into another one.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// `true` while the row is a member of a dependency graph.
    #[must_use]
    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    /// Mark graph membership.
    pub fn set_dependent(&mut self, dependent: bool) {
        self.dependent = dependent;
    }

    /// Current value of a foreign key, if the row sets it.
    #[must_use]
    pub fn foreign_key(&self, fk: ForeignKeyId) -> Option<&ForeignKeyValue> {
        self.foreign_keys.get(&fk)
    }

    /// Set a foreign key.
    pub fn set_foreign_key(&mut self, fk: ForeignKeyId, value: ForeignKeyValue) {
        self.foreign_keys.insert(fk, value);
    }

    /// Stop setting a foreign key, returning its former value. An insert
    /// leaves the columns NULL; an update leaves them untouched.
    pub fn clear_foreign_key(&mut self, fk: ForeignKeyId) -> Option<ForeignKeyValue> {
        self.foreign_keys.remove(&fk)
    }

    /// All foreign keys the row sets, ordered by id.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (ForeignKeyId, &ForeignKeyValue)> + '_ {
        self.foreign_keys.iter().map(|(fk, value)| (*fk, value))
    }

    /// Current value of a relation-id column, if the row sets it.
    #[must_use]
    pub fn relation_id(&self, column: ColumnId) -> Option<&RelationValue> {
        self.relation_ids.get(&column)
    }

    /// Set a relation-id column.
    pub fn set_relation_id(&mut self, column: ColumnId, value: RelationValue) {
        self.relation_ids.insert(column, value);
    }

    /// Stop setting a relation-id column, returning its former value.
    pub fn clear_relation_id(&mut self, column: ColumnId) -> Option<RelationValue> {
        self.relation_ids.remove(&column)
    }

    /// All relation-id columns the row sets, ordered by id.
    pub fn relation_ids(&self) -> impl Iterator<Item = (ColumnId, &RelationValue)> + '_ {
        self.relation_ids.iter().map(|(column, value)| (*column, value))
    }

    /// A shadow update on the same row as `self`, used to break a cycle.
    /// It sets nothing until the caller moves or nulls a value into it.
    #[must_use]
    pub fn cycle_patch(&self) -> Self {
        let mut patch = Self::new(self.table, RowAction::Update, self.scope, self.object);
        patch.origin = RowOrigin::CyclePatch;
        patch
    }

    /// Fold `from` into `self`: every value `from` sets overrides the one
    /// here. The caller must not use `from` afterwards.
    pub fn merge(&mut self, from: RowOp) {
        self.foreign_keys.extend(from.foreign_keys);
        self.relation_ids.extend(from.relation_ids);
    }

    /// Invalidate the row and hand its values to the caller.
    pub(crate) fn retire(&mut self) -> RowOp {
        self.valid = false;
        self.dependent = false;
        RowOp {
            table: self.table,
            action: self.action,
            scope: self.scope,
            object: self.object,
            foreign_keys: std::mem::take(&mut self.foreign_keys),
            relation_ids: std::mem::take(&mut self.relation_ids),
            valid: false,
            dependent: false,
            origin: self.origin,
        }
    }
}
