//! Table and constraint metadata consulted while ordering a flush.
//!
//! The schema only carries what ordering needs: which table a foreign key
//! lives on and which table it references, whether its columns accept NULL,
//! whether the database checks it immediately, and the joined-inheritance
//! parent of each table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a table within one [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a foreign key constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyId(pub u32);

impl fmt::Display for ForeignKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fk{}", self.0)
    }
}

/// Identifier of a relation-id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col{}", self.0)
    }
}

/// A table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Identifier.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Parent table under joined inheritance. The root owns the primary key.
    pub parent: Option<TableId>,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Identifier.
    pub id: ForeignKeyId,
    /// Constraint name.
    pub name: String,
    /// Table holding the referencing columns.
    pub table: TableId,
    /// Table whose primary key is referenced.
    pub references: TableId,
    /// All referencing columns accept NULL.
    pub nullable: bool,
    /// Checked at commit rather than per statement.
    pub deferred: bool,
    /// Known to the application only; the database does not enforce it.
    pub logical: bool,
}

impl ForeignKey {
    /// Returns `true` if the database checks the constraint per statement.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        !self.deferred && !self.logical
    }
}

/// Data for declaring a foreign key.
#[derive(Debug, Clone)]
pub struct NewForeignKey {
    /// Constraint name.
    pub name: String,
    /// Table holding the referencing columns.
    pub table: TableId,
    /// Table whose primary key is referenced.
    pub references: TableId,
    /// All referencing columns accept NULL.
    pub nullable: bool,
    /// Checked at commit rather than per statement.
    pub deferred: bool,
    /// Not enforced by the database.
    pub logical: bool,
}

impl NewForeignKey {
    /// A nullable, immediate, database-enforced foreign key.
    pub fn new(name: impl Into<String>, table: TableId, references: TableId) -> Self {
        Self {
            name: name.into(),
            table,
            references,
            nullable: true,
            deferred: false,
            logical: false,
        }
    }

    /// Mark the referencing columns NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the constraint deferred.
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Mark the constraint as application-level only.
    #[must_use]
    pub fn logical(mut self) -> Self {
        self.logical = true;
        self
    }
}

/// A denormalized column holding the identity of a related row without a
/// database constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationColumn {
    /// Identifier.
    pub id: ColumnId,
    /// Column name.
    pub name: String,
    /// Table holding the column.
    pub table: TableId,
    /// Column accepts NULL.
    pub nullable: bool,
}

/// Registry of tables, foreign keys and relation-id columns.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<Table>,
    foreign_keys: Vec<ForeignKey>,
    relation_columns: Vec<RelationColumn>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root table.
    pub fn add_table(&mut self, name: impl Into<String>) -> TableId {
        self.push_table(name.into(), None)
    }

    /// Add a table joined to `parent` under joined inheritance.
    pub fn add_subtable(&mut self, name: impl Into<String>, parent: TableId) -> TableId {
        self.push_table(name.into(), Some(parent))
    }

    fn push_table(&mut self, name: String, parent: Option<TableId>) -> TableId {
        let id = TableId(index_id(self.tables.len()));
        self.tables.push(Table { id, name, parent });
        id
    }

    /// Declare a foreign key.
    pub fn add_foreign_key(&mut self, fk: NewForeignKey) -> ForeignKeyId {
        let id = ForeignKeyId(index_id(self.foreign_keys.len()));
        self.foreign_keys.push(ForeignKey {
            id,
            name: fk.name,
            table: fk.table,
            references: fk.references,
            nullable: fk.nullable,
            deferred: fk.deferred,
            logical: fk.logical,
        });
        id
    }

    /// Declare a relation-id column.
    pub fn add_relation_column(
        &mut self,
        name: impl Into<String>,
        table: TableId,
        nullable: bool,
    ) -> ColumnId {
        let id = ColumnId(index_id(self.relation_columns.len()));
        self.relation_columns.push(RelationColumn {
            id,
            name: name.into(),
            table,
            nullable,
        });
        id
    }

    /// Look up a table.
    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.0 as usize)
    }

    /// Look up a foreign key.
    #[must_use]
    pub fn foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKey> {
        self.foreign_keys.get(id.0 as usize)
    }

    /// Look up a relation-id column.
    #[must_use]
    pub fn relation_column(&self, id: ColumnId) -> Option<&RelationColumn> {
        self.relation_columns.get(id.0 as usize)
    }

    /// All foreign keys declared on `table`.
    pub fn foreign_keys_on(&self, table: TableId) -> impl Iterator<Item = &ForeignKey> + '_ {
        self.foreign_keys.iter().filter(move |fk| fk.table == table)
    }

    /// Walk the joined-inheritance chain up to the root table, which owns
    /// the generated primary key.
    ///
    /// A malformed chain that loops back on itself stops after visiting
    /// every table once.
    #[must_use]
    pub fn base_table(&self, table: TableId) -> TableId {
        let mut current = table;
        for _ in 0..self.tables.len() {
            match self.table(current).and_then(|t| t.parent) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }
}

fn index_id(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
