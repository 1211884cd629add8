//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use rowflush::{
    ColumnId, ExecutionErrorKind, ForeignKeyId, ForeignKeyValue, KeyRegistry, KeyValue, ObjectId,
    RelationValue, RowAction, RowFailure, RowOp, RowOrigin, RowScope, Schema, StatementExecutor,
    TableId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub object: ObjectId,
    pub foreign_keys: BTreeMap<ForeignKeyId, KeyValue>,
    pub relation_ids: BTreeMap<ColumnId, KeyValue>,
}

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub action: RowAction,
    pub scope: RowScope,
    pub table: TableId,
    pub object: Option<ObjectId>,
    pub origin: RowOrigin,
}

/// In-memory database that enforces foreign keys the way a real one would:
/// immediate constraints per statement, deferred constraints at batch flush,
/// logical constraints never.
pub struct InMemoryDatabase {
    schema: Schema,
    tables: HashMap<TableId, BTreeMap<KeyValue, StoredRow>>,
    log: Vec<Executed>,
    failures: HashSet<(ObjectId, RowAction)>,
    next_key: i64,
    batches: usize,
}

impl InMemoryDatabase {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: HashMap::new(),
            log: Vec::new(),
            failures: HashSet::new(),
            next_key: 1000,
            batches: 0,
        }
    }

    /// Store a row as if an earlier transaction had committed it.
    pub fn seed(
        &mut self,
        table: TableId,
        object: ObjectId,
        key: KeyValue,
        foreign_keys: &[(ForeignKeyId, KeyValue)],
    ) {
        let row = StoredRow {
            object,
            foreign_keys: foreign_keys.iter().cloned().collect(),
            relation_ids: BTreeMap::new(),
        };
        self.tables.entry(table).or_default().insert(key, row);
    }

    /// Make every `action` on `object` fail.
    pub fn fail_on(&mut self, object: ObjectId, action: RowAction) {
        self.failures.insert((object, action));
    }

    pub fn row(&self, table: TableId, key: &KeyValue) -> Option<&StoredRow> {
        self.tables.get(&table).and_then(|rows| rows.get(key))
    }

    pub fn row_count(&self, table: TableId) -> usize {
        self.tables.get(&table).map_or(0, BTreeMap::len)
    }

    pub fn log(&self) -> &[Executed] {
        &self.log
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Index in the log of the first `action` on `object`.
    pub fn position(&self, action: RowAction, object: ObjectId) -> Option<usize> {
        self.log
            .iter()
            .position(|entry| entry.action == action && entry.object == Some(object))
    }

    /// Number of executed cycle patches.
    pub fn patch_count(&self) -> usize {
        self.log
            .iter()
            .filter(|entry| entry.origin == RowOrigin::CyclePatch)
            .count()
    }

    fn exists(&self, table: TableId, key: &KeyValue) -> bool {
        self.row(table, key).is_some()
    }

    fn resolve(
        keys: &KeyRegistry,
        fk: ForeignKeyId,
        value: &ForeignKeyValue,
    ) -> Result<Option<KeyValue>, RowFailure> {
        keys.resolve(value).map_err(|object| {
            RowFailure::constraint(format!("{fk} references {object}, which has no key"))
        })
    }

    fn apply_values(
        row: &RowOp,
        keys: &KeyRegistry,
        stored: &mut StoredRow,
    ) -> Result<(), RowFailure> {
        for (fk, value) in row.foreign_keys() {
            match Self::resolve(keys, fk, value)? {
                Some(key) => stored.foreign_keys.insert(fk, key),
                None => stored.foreign_keys.remove(&fk),
            };
        }
        for (column, value) in row.relation_ids() {
            match value {
                RelationValue::Null => {
                    stored.relation_ids.remove(&column);
                }
                RelationValue::Object { object, .. } => {
                    let key = keys.get(*object).cloned().ok_or_else(|| {
                        RowFailure::constraint(format!("{column} references {object}, which has no key"))
                    })?;
                    stored.relation_ids.insert(column, key);
                }
            }
        }
        Ok(())
    }

    /// Check NOT NULL and immediate foreign keys of a row about to be stored.
    fn check_row(&self, table: TableId, key: &KeyValue, row: &StoredRow) -> Result<(), RowFailure> {
        for fk in self.schema.foreign_keys_on(table) {
            match row.foreign_keys.get(&fk.id) {
                None if !fk.nullable => {
                    return Err(RowFailure::constraint(format!("{} is NOT NULL", fk.name)));
                }
                Some(target) if fk.is_immediate() => {
                    let own = fk.references == table && target == key;
                    if !own && !self.exists(fk.references, target) {
                        return Err(RowFailure::constraint(format!(
                            "{} references missing key {target}",
                            fk.name
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn insert(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<Option<KeyValue>, RowFailure> {
        let object = row
            .object()
            .ok_or_else(|| RowFailure::backend("insert without an object"))?;
        let (key, generated) = match keys.get(object) {
            Some(key) => (key.clone(), None),
            None => {
                self.next_key += 1;
                let key = KeyValue::Int(self.next_key);
                (key.clone(), Some(key))
            }
        };
        if self.exists(row.table(), &key) {
            return Err(RowFailure::new(
                ExecutionErrorKind::DuplicateKey,
                format!("key {key} already exists"),
            ));
        }

        let mut stored = StoredRow {
            object,
            foreign_keys: BTreeMap::new(),
            relation_ids: BTreeMap::new(),
        };
        Self::apply_values(row, keys, &mut stored)?;
        self.check_row(row.table(), &key, &stored)?;
        self.tables.entry(row.table()).or_default().insert(key, stored);
        Ok(generated)
    }

    fn stored_key(row: &RowOp, keys: &KeyRegistry) -> Result<KeyValue, RowFailure> {
        row.object()
            .and_then(|object| keys.get(object))
            .cloned()
            .ok_or_else(|| RowFailure::new(ExecutionErrorKind::MissingRow, "no key for row"))
    }

    fn update(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<(), RowFailure> {
        let key = Self::stored_key(row, keys)?;
        let mut stored = self
            .row(row.table(), &key)
            .cloned()
            .ok_or_else(|| RowFailure::new(ExecutionErrorKind::MissingRow, format!("no row {key}")))?;
        Self::apply_values(row, keys, &mut stored)?;
        self.check_row(row.table(), &key, &stored)?;
        self.tables.entry(row.table()).or_default().insert(key, stored);
        Ok(())
    }

    fn delete(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<(), RowFailure> {
        let table = row.table();
        let key = Self::stored_key(row, keys)?;
        if !self.exists(table, &key) {
            return Err(RowFailure::new(
                ExecutionErrorKind::MissingRow,
                format!("no row {key}"),
            ));
        }

        for (&other, rows) in &self.tables {
            for fk in self.schema.foreign_keys_on(other) {
                if fk.references != table || !fk.is_immediate() {
                    continue;
                }
                let referenced = rows.iter().any(|(row_key, stored)| {
                    let itself = other == table && row_key == &key;
                    !itself && stored.foreign_keys.get(&fk.id) == Some(&key)
                });
                if referenced {
                    return Err(RowFailure::constraint(format!(
                        "{} still references key {key}",
                        fk.name
                    )));
                }
            }
        }

        if let Some(rows) = self.tables.get_mut(&table) {
            rows.remove(&key);
        }
        Ok(())
    }
}

impl StatementExecutor for InMemoryDatabase {
    fn execute(&mut self, row: &RowOp, keys: &KeyRegistry) -> Result<Option<KeyValue>, RowFailure> {
        self.log.push(Executed {
            action: row.action(),
            scope: row.scope(),
            table: row.table(),
            object: row.object(),
            origin: row.origin(),
        });
        if let Some(object) = row.object()
            && self.failures.contains(&(object, row.action()))
        {
            return Err(RowFailure::backend("injected failure"));
        }

        match (row.scope(), row.action()) {
            (RowScope::AllRows, RowAction::Delete) => {
                self.tables.remove(&row.table());
                Ok(None)
            }
            (RowScope::AllRows, _) => Ok(None),
            (_, RowAction::Insert) => self.insert(row, keys),
            (_, RowAction::Update) => self.update(row, keys).map(|()| None),
            (_, RowAction::Delete) => self.delete(row, keys).map(|()| None),
        }
    }

    fn flush_batch(&mut self) -> Result<(), RowFailure> {
        self.batches += 1;
        for (&table, rows) in &self.tables {
            for fk in self.schema.foreign_keys_on(table) {
                if !fk.deferred || fk.logical {
                    continue;
                }
                for stored in rows.values() {
                    if let Some(target) = stored.foreign_keys.get(&fk.id)
                        && !self.exists(fk.references, target)
                    {
                        return Err(RowFailure::constraint(format!(
                            "deferred {} references missing key {target}",
                            fk.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
