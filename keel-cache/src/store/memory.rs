//! In-process cache store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use keel_core::KeelResult;

use super::{CacheStats, CacheStore};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Vec<u8>>,
    stats: CacheStats,
}

/// `HashMap`-backed store for tests and single-process deployments.
///
/// Never fails; every operation succeeds or reports a miss.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<Inner>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read(|inner| inner.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present, without touching hit/miss counters.
    pub fn contains_key(&self, key: &str) -> bool {
        self.read(|inner| inner.entries.contains_key(key))
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.read(|inner| inner.entries.keys().cloned().collect::<Vec<_>>());
        keys.sort();
        keys
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&inner)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        Ok(self.write(|inner| {
            let value = inner.entries.get(key).cloned();
            if value.is_some() {
                inner.stats.hits += 1;
            } else {
                inner.stats.misses += 1;
            }
            value
        }))
    }

    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()> {
        self.write(|inner| {
            inner.entries.insert(key.to_string(), value.to_vec());
            inner.stats.writes += 1;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> KeelResult<bool> {
        Ok(self.write(|inner| {
            let removed = inner.entries.remove(key).is_some();
            if removed {
                inner.stats.deletes += 1;
            }
            removed
        }))
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        Ok(self.read(|inner| CacheStats {
            entry_count: inner.entries.len() as u64,
            ..inner.stats
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));

        store.set("a", b"2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryCacheStore::new();
        store.set("a", b"1").await.unwrap();
        store.set("b", b"2").await.unwrap();
        store.get("a").await.unwrap();
        store.get("missing").await.unwrap();
        store.delete("b").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            CacheStats {
                hits: 1,
                misses: 1,
                writes: 2,
                deletes: 1,
                entry_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = InMemoryCacheStore::new();
        store.set("b", b"").await.unwrap();
        store.set("a", b"").await.unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.contains_key("a"));
    }
}
