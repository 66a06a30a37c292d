//! Cache store backends.
//!
//! The orchestrator talks to a [`CacheStore`]: an opaque byte store keyed by
//! strings. Stores know nothing about indexes, payloads, or query results;
//! the key layout lives in [`crate::keys`].
//!
//! # Failure Contract
//!
//! A missing key is `Ok(None)`, never an error. Any failure to reach or
//! operate the store is a `CacheError::Transport`, which callers must keep
//! distinct from a miss.

mod lmdb;
mod memory;

pub use lmdb::{LmdbCacheStore, LmdbStoreError};
pub use memory::InMemoryCacheStore;

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::KeelResult;

/// Pluggable key/value byte store.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Bytes stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()>;

    /// Remove `key`. Returns whether it was present.
    async fn delete(&self, key: &str) -> KeelResult<bool>;

    /// Usage statistics.
    async fn stats(&self) -> KeelResult<CacheStats>;
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> KeelResult<bool> {
        (**self).delete(key).await
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        (**self).stats().await
    }
}

/// Statistics about cache store usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found a value.
    pub hits: u64,
    /// Number of `get` calls that found nothing.
    pub misses: u64,
    /// Number of successful `set` calls.
    pub writes: u64,
    /// Number of `delete` calls that removed a value.
    pub deletes: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
