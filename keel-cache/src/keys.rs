//! Cache store key layout.
//!
//! The orchestrator is the only component that knows how logical entries map
//! onto store keys. A [`KeySpace`] cannot be built without naming both the
//! database and the entity, so every index pointer and query-result key is
//! scoped to one `(database, entity)` pair.
//!
//! # Key Format
//!
//! | Entry              | Store key                              | Value            |
//! |--------------------|----------------------------------------|------------------|
//! | Index pointer      | `<database>_<entity>_<index values>`   | record id (UTF-8)|
//! | Query result       | `<database>_<entity>_<cache_key>`      | encoded result   |
//! | Record payload     | `<record id>`                          | encoded record   |
//!
//! Index values and `cache_value` use the same `_`-joined layout, which is
//! what lets an equality predicate land on a pointer written at insert time.

use keel_core::KEY_SEPARATOR;

use crate::id::RecordId;

/// Key scope for one entity in one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySpace<'a> {
    database: &'a str,
    entity: &'a str,
}

impl<'a> KeySpace<'a> {
    pub fn new(database: &'a str, entity: &'a str) -> Self {
        Self { database, entity }
    }

    pub fn database(&self) -> &'a str {
        self.database
    }

    pub fn entity(&self) -> &'a str {
        self.entity
    }

    /// `<database>_<entity>_`, shared by every key in this scope.
    pub fn prefix(&self) -> String {
        format!(
            "{}{sep}{}{sep}",
            self.database,
            self.entity,
            sep = KEY_SEPARATOR
        )
    }

    /// Key of an index pointer for `_`-joined composite values.
    pub fn index_key(&self, values: &str) -> String {
        format!("{}{}", self.prefix(), values)
    }

    /// Key of a cached query result for a predicate's `cache_key`.
    pub fn query_key(&self, cache_key: &str) -> String {
        format!("{}{}", self.prefix(), cache_key)
    }
}

/// Key of a record payload.
pub fn payload_key(id: &RecordId) -> String {
    id.as_str().to_string()
}
