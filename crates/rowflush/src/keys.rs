//! Primary keys known for persistent objects.

use crate::row::{ForeignKeyValue, KeyValue, ObjectId};
use std::collections::HashMap;

/// Maps object identity to primary key value.
///
/// Seeded with application-assigned keys before the flush and extended with
/// every key the executor generates for an insert.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<ObjectId, KeyValue>,
}

impl KeyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the key of `object`, returning the key it replaces.
    pub fn assign(&mut self, object: ObjectId, key: KeyValue) -> Option<KeyValue> {
        self.keys.insert(object, key)
    }

    /// Key of `object`, if known.
    #[must_use]
    pub fn get(&self, object: ObjectId) -> Option<&KeyValue> {
        self.keys.get(&object)
    }

    /// Returns `true` if the key of `object` is known.
    #[must_use]
    pub fn contains(&self, object: ObjectId) -> bool {
        self.keys.contains_key(&object)
    }

    /// Resolve a foreign key value to the key it stores.
    ///
    /// `Ok(None)` means NULL. `Err` names the referenced object whose key
    /// is not known yet.
    pub fn resolve(&self, value: &ForeignKeyValue) -> Result<Option<KeyValue>, ObjectId> {
        match value {
            ForeignKeyValue::Null => Ok(None),
            ForeignKeyValue::Key(key) => Ok(Some(key.clone())),
            ForeignKeyValue::Object(object) => {
                self.get(*object).cloned().map(Some).ok_or(*object)
            }
        }
    }

    /// Number of known keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no key is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
