//! Cache-aside orchestration.
//!
//! [`CacheAside`] keeps composite secondary indexes over cached records and
//! answers reads through them before the primary store is consulted.
//!
//! # Entries
//!
//! - **Index pointer**: `<db>_<entity>_<index values>` to a [`RecordId`].
//!   Written for every declared composite index whose fields are all present
//!   on the record.
//! - **Record payload**: `<record id>` to the encoded field values. One per
//!   record, shared by all of its pointers.
//! - **Query result**: `<db>_<entity>_<cache_key>` to an encoded result.
//!   Written only on request.
//!
//! # Failure Semantics
//!
//! A miss is `Ok(None)`. A store failure is a `CacheError::Transport` (or
//! `Timeout`/`Cancelled`/`GateClosed`), never a miss. A payload that exists
//! but does not decode is `CacheError::Decode`. Nothing is retried here.
//!
//! There is no multi-key atomicity: a pointer may outlive its payload, and
//! concurrent writers of the same pointer race with the last one winning.
//! A pointer whose payload is gone reads as a miss.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::try_join_all;
use keel_core::{CacheError, CompiledQuery, FieldValues, KeelError, KeelResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{Codec, JsonCodec};
use crate::config::{CacheConfig, CacheErrorPolicy};
use crate::gate::{CacheContext, CapacityGate};
use crate::id::{IdGenerator, RecordId, UuidV7Generator};
use crate::index::{parse_definitions, CompositeIndex};
use crate::keys::{payload_key, KeySpace};
use crate::read::{CacheRead, PrimaryFetcher, ReadOptions, ReadSource};
use crate::store::{CacheStats, CacheStore};

/// Cache-aside orchestrator over a [`CacheStore`].
///
/// Construct one per process and share it; clones share the store, the
/// identifier generator, and the capacity gate.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use keel_cache::{CacheAside, CacheConfig, CacheContext, InMemoryCacheStore};
/// use keel_core::{Compiler, FieldValues, Predicate};
/// use serde_json::json;
///
/// # tokio_test_block_on(async {
/// let cache = CacheAside::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::default())?;
/// let ctx = CacheContext::background();
///
/// let mut user = FieldValues::new();
/// user.insert("email".into(), json!("a@x.com"));
/// cache.record_insert(&ctx, &["email"], &user, "db1", "users").await?;
///
/// let query = Compiler::relational().compile(&Predicate::eq("email", "a@x.com"))?;
/// let found: Option<FieldValues> = cache.lookup_by_equality(&ctx, &query, "db1", "users").await?;
/// assert_eq!(found, Some(user));
/// # Ok::<(), keel_core::KeelError>(())
/// # }).unwrap();
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct CacheAside<S: ?Sized, C = JsonCodec> {
    store: Arc<S>,
    codec: C,
    ids: Arc<dyn IdGenerator>,
    gate: CapacityGate,
    config: CacheConfig,
}

impl<S: CacheStore + ?Sized> CacheAside<S, JsonCodec> {
    /// JSON payloads, UUIDv7 identifiers, and a gate sized from `config`.
    pub fn new(store: Arc<S>, config: CacheConfig) -> KeelResult<Self> {
        Self::with_parts(store, JsonCodec, Arc::new(UuidV7Generator::new()), config)
    }
}

impl<S: CacheStore + ?Sized, C: Codec> CacheAside<S, C> {
    /// Assemble an orchestrator from explicit collaborators.
    pub fn with_parts(
        store: Arc<S>,
        codec: C,
        ids: Arc<dyn IdGenerator>,
        config: CacheConfig,
    ) -> KeelResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            codec,
            ids,
            gate: CapacityGate::new(config.max_in_flight),
            config,
        })
    }

    /// Share an existing gate, e.g. one bounding several orchestrators.
    pub fn with_gate(mut self, gate: CapacityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gate(&self) -> &CapacityGate {
        &self.gate
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Index and cache a freshly inserted record.
    ///
    /// Writes one pointer per qualifying definition, all to the same new
    /// identifier, then the payload. Returns the identifier, or `None` when
    /// no definition qualified and nothing was written.
    ///
    /// Definition limits are checked before any write.
    pub async fn record_insert<D: AsRef<str>>(
        &self,
        ctx: &CacheContext,
        definitions: &[D],
        fields: &FieldValues,
        database: &str,
        entity: &str,
    ) -> KeelResult<Option<RecordId>> {
        if definitions.is_empty() {
            return Ok(None);
        }
        let indexes = self.parse_indexes(definitions)?;
        let space = KeySpace::new(database, entity);
        let pointer_keys =
            unique(indexes.iter().filter_map(|index| pointer_key(&space, index, fields)));

        if pointer_keys.is_empty() {
            debug!(database, entity, "no composite index qualifies; record not cached");
            return Ok(None);
        }

        let payload = self.encode(fields)?;
        let id = self.ids.next();

        try_join_all(
            pointer_keys
                .iter()
                .map(|key| self.store_set(ctx, key, id.as_bytes())),
        )
        .await?;
        self.store_set(ctx, &payload_key(&id), &payload).await?;

        debug!(
            database,
            entity,
            record_id = %id,
            pointers = pointer_keys.len(),
            "record cached"
        );
        Ok(Some(id))
    }

    /// Reconcile index pointers and the payload after a record changed.
    ///
    /// The identifier behind the old pointers is reused; a fresh one is
    /// minted only when none of them resolve. Pointers whose key no longer
    /// matches the record are removed, pointers for the new values are
    /// written where they do not already resolve to the identifier, and the
    /// payload is always rewritten. Returns the identifier, or `None` when the
    /// new record qualifies for no index and there was nothing to reuse.
    pub async fn record_update<D: AsRef<str>>(
        &self,
        ctx: &CacheContext,
        old_fields: &FieldValues,
        new_fields: &FieldValues,
        definitions: &[D],
        database: &str,
        entity: &str,
    ) -> KeelResult<Option<RecordId>> {
        if definitions.is_empty() {
            return Ok(None);
        }
        let indexes = self.parse_indexes(definitions)?;
        let space = KeySpace::new(database, entity);

        let old_keys =
            unique(indexes.iter().filter_map(|index| pointer_key(&space, index, old_fields)));
        let new_keys =
            unique(indexes.iter().filter_map(|index| pointer_key(&space, index, new_fields)));

        let mut current: HashMap<&str, RecordId> = HashMap::new();
        for key in &old_keys {
            if let Some(bytes) = self.store_get(ctx, key).await? {
                current.insert(key.as_str(), pointer_target(key, bytes)?);
            }
        }

        let reused = old_keys.iter().find_map(|key| current.get(key.as_str()).cloned());
        let id = match reused {
            Some(id) => id,
            None if new_keys.is_empty() => {
                debug!(database, entity, "updated record qualifies for no index");
                return Ok(None);
            }
            None => self.ids.next(),
        };

        let payload = self.encode(new_fields)?;

        let new_set: HashSet<&str> = new_keys.iter().map(String::as_str).collect();
        let stale: Vec<&String> = old_keys
            .iter()
            .filter(|key| !new_set.contains(key.as_str()))
            .collect();
        let fresh: Vec<&String> = new_keys
            .iter()
            .filter(|key| current.get(key.as_str()) != Some(&id))
            .collect();

        try_join_all(stale.iter().map(|key| self.store_delete(ctx, key))).await?;
        try_join_all(fresh.iter().map(|key| self.store_set(ctx, key, id.as_bytes()))).await?;
        self.store_set(ctx, &payload_key(&id), &payload).await?;

        debug!(
            database,
            entity,
            record_id = %id,
            removed = stale.len(),
            written = fresh.len(),
            "record cache reconciled"
        );
        Ok(Some(id))
    }

    /// Cache `result` under the query's signature.
    ///
    /// Returns `false` without writing when the query has no signature.
    pub async fn store_query_result<T: Serialize + ?Sized>(
        &self,
        ctx: &CacheContext,
        query: &CompiledQuery,
        database: &str,
        entity: &str,
        result: &T,
    ) -> KeelResult<bool> {
        let Some(cache_key) = query.cache_key() else {
            debug!(database, entity, "query without predicate; result not cached");
            return Ok(false);
        };
        let key = KeySpace::new(database, entity).query_key(cache_key);
        let bytes = self.encode(result)?;
        self.store_set(ctx, &key, &bytes).await?;
        debug!(database, entity, key = %key, "query result cached");
        Ok(true)
    }

    /// Drop the cached result for this query. Returns whether one existed.
    pub async fn invalidate_query_result(
        &self,
        ctx: &CacheContext,
        query: &CompiledQuery,
        database: &str,
        entity: &str,
    ) -> KeelResult<bool> {
        let Some(cache_key) = query.cache_key() else {
            return Ok(false);
        };
        let key = KeySpace::new(database, entity).query_key(cache_key);
        self.store_delete(ctx, &key).await
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Resolve an equality predicate through an index pointer.
    ///
    /// The pointer key comes from the predicate's `cache_value` alone; it is
    /// not checked against the entity's declared definitions, so a hit needs
    /// the values to line up with a pointer written at insert time. Queries
    /// that are not purely equality-based always miss.
    pub async fn lookup_by_equality<T: DeserializeOwned>(
        &self,
        ctx: &CacheContext,
        query: &CompiledQuery,
        database: &str,
        entity: &str,
    ) -> KeelResult<Option<T>> {
        let Some(cache_value) = query.cache_value() else {
            return Ok(None);
        };
        if !query.default_cacheable() {
            return Ok(None);
        }

        let pointer = KeySpace::new(database, entity).index_key(cache_value);
        let Some(bytes) = self.store_get(ctx, &pointer).await? else {
            debug!(database, entity, key = %pointer, "index pointer miss");
            return Ok(None);
        };
        let id = pointer_target(&pointer, bytes)?;

        let key = payload_key(&id);
        let Some(payload) = self.store_get(ctx, &key).await? else {
            debug!(database, entity, record_id = %id, "index pointer without payload");
            return Ok(None);
        };

        debug!(database, entity, record_id = %id, "index pointer hit");
        self.decode(&key, &payload).map(Some)
    }

    /// Look up a cached result for this exact predicate.
    pub async fn lookup_by_query_signature<T: DeserializeOwned>(
        &self,
        ctx: &CacheContext,
        query: &CompiledQuery,
        database: &str,
        entity: &str,
    ) -> KeelResult<Option<T>> {
        let Some(cache_key) = query.cache_key() else {
            return Ok(None);
        };
        let key = KeySpace::new(database, entity).query_key(cache_key);
        let Some(bytes) = self.store_get(ctx, &key).await? else {
            debug!(database, entity, key = %key, "query result miss");
            return Ok(None);
        };
        debug!(database, entity, key = %key, "query result hit");
        self.decode(&key, &bytes).map(Some)
    }

    /// Cache-aside find.
    ///
    /// Unless `options.force_primary` is set, tries the equality fast path,
    /// then the query-result cache, and only then `primary`. A primary hit
    /// is written back under the query signature when `options.cache_result`
    /// is set. Store unavailability follows
    /// [`CacheConfig::on_cache_error`]; decode failures always surface.
    ///
    /// The equality fast path decodes one record payload into `T`, so for a
    /// default-cacheable query `T` must be the record shape. Reads of a
    /// collection (`T = Vec<_>`) set [`ReadOptions::without_index_lookup`].
    pub async fn find<T, F>(
        &self,
        ctx: &CacheContext,
        query: &CompiledQuery,
        database: &str,
        entity: &str,
        options: ReadOptions,
        primary: &F,
    ) -> KeelResult<Option<CacheRead<T>>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: PrimaryFetcher<T> + ?Sized,
    {
        if options.force_primary {
            return Ok(primary.fetch(query).await?.map(CacheRead::from_primary));
        }

        if query.default_cacheable() && !options.skip_index_lookup {
            let hit = self
                .lookup_by_equality(ctx, query, database, entity)
                .await
                .or_else(|e| self.absorb(e, "index lookup"))?;
            if let Some(value) = hit {
                return Ok(Some(CacheRead::new(value, ReadSource::IndexPointer)));
            }
        }

        let hit = self
            .lookup_by_query_signature(ctx, query, database, entity)
            .await
            .or_else(|e| self.absorb(e, "query result lookup"))?;
        if let Some(value) = hit {
            return Ok(Some(CacheRead::new(value, ReadSource::QuerySignature)));
        }

        let Some(value) = primary.fetch(query).await? else {
            return Ok(None);
        };

        if options.cache_result {
            self.store_query_result(ctx, query, database, entity, &value)
                .await
                .map(|_| ())
                .or_else(|e| self.absorb(e, "query result store"))?;
        }
        Ok(Some(CacheRead::from_primary(value)))
    }

    /// Store statistics.
    pub async fn stats(&self) -> KeelResult<CacheStats> {
        self.store.stats().await
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn parse_indexes<D: AsRef<str>>(&self, definitions: &[D]) -> KeelResult<Vec<CompositeIndex>> {
        parse_definitions(
            definitions,
            self.config.max_indexes,
            self.config.max_composite_fields,
        )
    }

    /// Apply the configured policy to a cache failure on the read path.
    fn absorb<T: Default>(&self, err: KeelError, stage: &'static str) -> KeelResult<T> {
        let degradable = matches!(
            &err,
            KeelError::Cache(e) if e.is_transport() && *e != CacheError::Cancelled
        );
        if degradable && self.config.on_cache_error == CacheErrorPolicy::Degrade {
            warn!(error = %err, stage, "cache unavailable; continuing without it");
            Ok(T::default())
        } else {
            Err(err)
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> KeelResult<Vec<u8>> {
        self.codec.encode(value).map_err(|e| {
            CacheError::Encode {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> KeelResult<T> {
        self.codec.decode(bytes).map_err(|e| {
            CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn store_get(&self, ctx: &CacheContext, key: &str) -> KeelResult<Option<Vec<u8>>> {
        ctx.or_timeout(self.config.op_timeout)
            .run(async {
                let _permit = self.gate.acquire(1).await?;
                self.store.get(key).await
            })
            .await
    }

    async fn store_set(&self, ctx: &CacheContext, key: &str, value: &[u8]) -> KeelResult<()> {
        ctx.or_timeout(self.config.op_timeout)
            .run(async {
                let _permit = self.gate.acquire(1).await?;
                self.store.set(key, value).await
            })
            .await
    }

    async fn store_delete(&self, ctx: &CacheContext, key: &str) -> KeelResult<bool> {
        ctx.or_timeout(self.config.op_timeout)
            .run(async {
                let _permit = self.gate.acquire(1).await?;
                self.store.delete(key).await
            })
            .await
    }
}

impl<S: ?Sized, C: Clone> Clone for CacheAside<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            ids: Arc::clone(&self.ids),
            gate: self.gate.clone(),
            config: self.config.clone(),
        }
    }
}

fn pointer_key(
    space: &KeySpace<'_>,
    index: &CompositeIndex,
    fields: &FieldValues,
) -> Option<String> {
    index.values_key(fields).map(|values| space.index_key(&values))
}

/// Decode the record identifier stored in an index pointer.
fn pointer_target(key: &str, bytes: Vec<u8>) -> KeelResult<RecordId> {
    String::from_utf8(bytes).map(RecordId::new).map_err(|e| {
        CacheError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Keys in first-seen order with duplicates dropped; two definitions can
/// produce the same pointer.
fn unique(keys: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.filter(|key| seen.insert(key.clone())).collect()
}
