//! Record identifiers.
//!
//! A record identifier names one cached payload. Every index pointer written
//! for a record stores the same identifier, so the payload is decoupled from
//! the keys that reach it.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic, time-ordered, globally unique payload identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh record identifiers.
pub trait IdGenerator: Send + Sync {
    /// Next identifier; strictly greater than every earlier one from this
    /// generator.
    fn next(&self) -> RecordId;
}

/// UUIDv7 identifiers, timestamp-sortable.
///
/// Two identifiers minted within the same millisecond are still strictly
/// ordered: a candidate that does not sort after the previous one is bumped
/// to its successor.
#[derive(Debug)]
pub struct UuidV7Generator {
    last: Mutex<Uuid>,
}

impl UuidV7Generator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Uuid::nil()),
        }
    }
}

impl Default for UuidV7Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UuidV7Generator {
    fn next(&self) -> RecordId {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = Uuid::now_v7();
        if candidate <= *last {
            candidate = Uuid::from_u128(last.as_u128().wrapping_add(1));
        }
        *last = candidate;
        RecordId(candidate.to_string())
    }
}
