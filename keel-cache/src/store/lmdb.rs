//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! persistent byte store. One unnamed database holds every key; reads run in
//! a read transaction and each `set`/`delete` commits its own write
//! transaction.
//!
//! LMDB caps key length (511 bytes by default). Longer keys are stored under
//! `#sha256:<hex digest>` so long index values and large query signatures
//! stay addressable.

use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use keel_core::{CacheError, KeelError, KeelResult};
use sha2::{Digest, Sha256};

use super::{CacheStats, CacheStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for KeelError {
    fn from(e: LmdbStoreError) -> Self {
        KeelError::Cache(CacheError::Transport {
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

const DIGEST_PREFIX: &str = "#sha256:";

/// Key bytes as stored: verbatim when they fit, digested otherwise.
fn storage_key(key: &str, max_key_size: usize) -> Cow<'_, [u8]> {
    if key.len() <= max_key_size {
        return Cow::Borrowed(key.as_bytes());
    }
    let digest = Sha256::digest(key.as_bytes());
    Cow::Owned(format!("{DIGEST_PREFIX}{}", hex::encode(digest)).into_bytes())
}

/// Persistent cache store on LMDB.
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    max_key_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl LmdbCacheStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the directory
        // is not opened again elsewhere in this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let max_key_size = env.max_key_size();
        Ok(Self {
            env,
            db,
            max_key_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    fn key<'k>(&self, key: &'k str) -> Cow<'k, [u8]> {
        storage_key(key, self.max_key_size)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self
            .db
            .get(&rtxn, &self.key(key))
            .map_err(txn_error)?
            .map(<[u8]>::to_vec);
        Ok(value)
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, &self.key(key), value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn remove(&self, key: &str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, &self.key(key)).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn entry_count(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }
}

impl std::fmt::Debug for LmdbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheStore")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        let value = self.read(key)?;
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()> {
        self.write(key, value)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KeelResult<bool> {
        let deleted = self.remove(key)?;
        if deleted {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            entry_count: self.entry_count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LmdbCacheStore::open(temp_dir.path(), 10).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _dir) = create_test_store();
        store.set("db1_users_a@x.com", b"0190").await.unwrap();
        assert_eq!(
            store.get("db1_users_a@x.com").await.unwrap(),
            Some(b"0190".to_vec())
        );
        assert_eq!(store.get("db1_users_b@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let (store, _dir) = create_test_store();
        store.set("k", b"1").await.unwrap();
        store.set("k", b"2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _dir) = create_test_store();
        store.set("a", b"1").await.unwrap();
        store.set("b", b"2").await.unwrap();
        store.get("a").await.unwrap();
        store.get("c").await.unwrap();
        store.delete("a").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_long_keys_round_trip() {
        let (store, _dir) = create_test_store();
        let long = format!("db1_users_{}", "x".repeat(600));
        let other = format!("db1_users_{}", "y".repeat(600));

        store.set(&long, b"0190").await.unwrap();
        assert_eq!(store.get(&long).await.unwrap(), Some(b"0190".to_vec()));
        assert_eq!(store.get(&other).await.unwrap(), None);

        assert!(store.delete(&long).await.unwrap());
        assert_eq!(store.get(&long).await.unwrap(), None);
    }

    #[test]
    fn test_storage_key_digests_only_oversized_keys() {
        assert_eq!(storage_key("short", 511).as_ref(), b"short");

        let long = "k".repeat(512);
        let stored = storage_key(&long, 511);
        assert!(stored.starts_with(DIGEST_PREFIX.as_bytes()));
        assert_eq!(stored.len(), DIGEST_PREFIX.len() + 64);
        assert_eq!(stored, storage_key(&long, 511));
    }

    #[test]
    fn test_error_maps_to_transport() {
        let err: KeelError = LmdbStoreError::Transaction("boom".to_string()).into();
        assert!(err.is_cache_transport());
    }
}
