//! KEEL Test Utilities
//!
//! Shared test infrastructure for the KEEL workspace:
//! - Instrumented cache stores (recording, failing, slow)
//! - Proptest generators for records, index definitions, and predicates
//! - Fixtures for the common user-record scenario
//! - Assertions for KEEL error classes

pub use keel_cache::{
    CacheAside, CacheConfig, CacheContext, CacheStats, CacheStore, InMemoryCacheStore, RecordId,
};
pub use keel_core::{
    CacheError, CompiledQuery, Compiler, FieldValues, KeelError, KeelResult, Operator, Predicate,
};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// LOGGING
// ============================================================================

/// Install a `tracing` subscriber for test output, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keel_cache=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK STORES
// ============================================================================

/// One operation observed by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get(String),
    Set(String),
    Delete(String),
}

/// In-memory store that logs every operation in call order.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryCacheStore,
    ops: Mutex<Vec<StoreOp>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation so far.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Keys written by `set`, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Set(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Keys passed to `delete`, in call order.
    pub fn deletes(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Delete(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// The backing store, for direct inspection.
    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).push(op);
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        self.record(StoreOp::Get(key.to_string()));
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()> {
        self.record(StoreOp::Set(key.to_string()));
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> KeelResult<bool> {
        self.record(StoreOp::Delete(key.to_string()));
        self.inner.delete(key).await
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        self.inner.stats().await
    }
}

/// Which operations a [`FailingStore`] refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every operation fails.
    All,
    /// Reads succeed against the backing store; writes and deletes fail.
    Writes,
}

/// Store that fails with `CacheError::Transport`, simulating an
/// unreachable cache.
#[derive(Debug)]
pub struct FailingStore {
    inner: InMemoryCacheStore,
    mode: FailureMode,
    reason: String,
}

impl FailingStore {
    /// Fail every operation.
    pub fn new() -> Self {
        Self::with_mode(FailureMode::All)
    }

    pub fn with_mode(mode: FailureMode) -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            mode,
            reason: "connection refused".to_string(),
        }
    }

    /// The backing store used when reads are allowed.
    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    fn error(&self) -> KeelError {
        CacheError::Transport {
            reason: self.reason.clone(),
        }
        .into()
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        match self.mode {
            FailureMode::All => Err(self.error()),
            FailureMode::Writes => self.inner.get(key).await,
        }
    }

    async fn set(&self, _key: &str, _value: &[u8]) -> KeelResult<()> {
        Err(self.error())
    }

    async fn delete(&self, _key: &str) -> KeelResult<bool> {
        Err(self.error())
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        Err(self.error())
    }
}

/// Store that sleeps before every operation. Pair with a paused tokio clock
/// to test deadlines and gate contention.
#[derive(Debug)]
pub struct SlowStore {
    inner: InMemoryCacheStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            delay,
        }
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }
}

#[async_trait]
impl CacheStore for SlowStore {
    async fn get(&self, key: &str) -> KeelResult<Option<Vec<u8>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> KeelResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> KeelResult<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn stats(&self) -> KeelResult<CacheStats> {
        self.inner.stats().await
    }
}

/// Orchestrator over `store` with default configuration.
pub fn cache_over<S: CacheStore>(store: Arc<S>) -> CacheAside<S> {
    match CacheAside::new(store, CacheConfig::default()) {
        Ok(cache) => cache,
        Err(e) => panic!("default cache config rejected: {e}"),
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for KEEL inputs.
    //!
    //! Generated string values never contain the `_` key separator, so two
    //! distinct records cannot collide on an index key by accident.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// A lowercase field name.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,7}"
    }

    /// A scalar field value: string, integer, or boolean.
    pub fn arb_scalar_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-zA-Z0-9@.]{1,12}".prop_map(Value::String),
            any::<i32>().prop_map(|n| json!(n)),
            any::<bool>().prop_map(Value::Bool),
        ]
    }

    /// A record with a value for every one of `fields`.
    pub fn arb_record(fields: Vec<String>) -> impl Strategy<Value = FieldValues> {
        let count = fields.len();
        prop::collection::vec(arb_scalar_value(), count).prop_map(move |values| {
            fields.iter().cloned().zip(values).collect::<FieldValues>()
        })
    }

    /// A record over one to six distinct field names.
    pub fn arb_field_values() -> impl Strategy<Value = FieldValues> {
        prop::collection::btree_set(arb_field_name(), 1..7)
            .prop_flat_map(|names| arb_record(names.into_iter().collect()))
    }

    /// One composite definition drawn from `fields`, at most `max_fields`
    /// long, in random order.
    pub fn arb_index_definition(
        fields: Vec<String>,
        max_fields: usize,
    ) -> impl Strategy<Value = String> {
        let upper = max_fields.min(fields.len()).max(1);
        prop::sample::subsequence(fields, 1..=upper)
            .prop_shuffle()
            .prop_map(|parts| parts.join(","))
    }

    /// Up to `max_indexes` definitions drawn from `fields`.
    pub fn arb_index_definitions(
        fields: Vec<String>,
        max_indexes: usize,
        max_fields: usize,
    ) -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_index_definition(fields, max_fields), 1..=max_indexes.max(1))
    }

    /// Any of the twelve operators.
    pub fn arb_operator() -> impl Strategy<Value = Operator> {
        prop::sample::select(Operator::ALL.to_vec())
    }

    /// A leaf whose value suits its operator: sequences for IN/NOT_IN,
    /// `null` for the null checks, scalars otherwise.
    pub fn arb_leaf() -> impl Strategy<Value = Predicate> {
        (arb_field_name(), arb_operator()).prop_flat_map(|(field, operator)| {
            let value = if operator.takes_sequence() {
                prop::collection::vec(arb_scalar_value(), 1..4)
                    .prop_map(Value::Array)
                    .boxed()
            } else if operator.is_null_check() {
                Just(Value::Null).boxed()
            } else {
                arb_scalar_value().boxed()
            };
            value.prop_map(move |value| Predicate::leaf(field.clone(), operator, value))
        })
    }

    /// Predicate trees of mixed operators under AND/OR/GROUP.
    pub fn arb_predicate() -> impl Strategy<Value = Predicate> {
        arb_leaf().prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(Predicate::And),
                prop::collection::vec(inner.clone(), 1..4).prop_map(Predicate::Or),
                inner.prop_map(Predicate::group),
            ]
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and queries for common scenarios.

    use super::*;
    use serde_json::json;

    pub const DATABASE: &str = "db1";
    pub const ENTITY: &str = "users";

    /// `{email, password}` user record.
    pub fn user_record(email: &str, password: &str) -> FieldValues {
        let mut fields = FieldValues::new();
        fields.insert("email".to_string(), json!(email));
        fields.insert("password".to_string(), json!(password));
        fields
    }

    /// The `a@x.com` / `p` user.
    pub fn default_user() -> FieldValues {
        user_record("a@x.com", "p")
    }

    /// Index definitions for the user entity.
    pub fn user_definitions() -> Vec<String> {
        vec!["email".to_string(), "email,password".to_string()]
    }

    /// Relational equality query over `pairs`, AND-joined.
    pub fn equality_query(pairs: &[(&str, &str)]) -> CompiledQuery {
        let leaves = pairs
            .iter()
            .map(|(field, value)| Predicate::eq(*field, *value));
        match Compiler::relational().compile(&Predicate::and(leaves)) {
            Ok(query) => query,
            Err(e) => panic!("equality query failed to compile: {e}"),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for KEEL error classes.

    use super::*;

    /// Assert that a result is a cache transport failure.
    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &KeelResult<T>) {
        match result {
            Err(e) if e.is_cache_transport() => {}
            other => panic!("Expected cache transport error, got: {:?}", other),
        }
    }

    /// Assert that a result is an index declaration error.
    #[track_caller]
    pub fn assert_index_error<T: std::fmt::Debug>(result: &KeelResult<T>) {
        match result {
            Err(KeelError::Index(_)) => {}
            other => panic!("Expected Index error, got: {:?}", other),
        }
    }

    /// Assert that a result is a decode error.
    #[track_caller]
    pub fn assert_decode_error<T: std::fmt::Debug>(result: &KeelResult<T>) {
        match result {
            Err(KeelError::Cache(CacheError::Decode { .. })) => {}
            other => panic!("Expected Decode error, got: {:?}", other),
        }
    }

    /// Assert that a lookup was a clean miss.
    #[track_caller]
    pub fn assert_miss<T: std::fmt::Debug>(result: &KeelResult<Option<T>>) {
        match result {
            Ok(None) => {}
            other => panic!("Expected a cache miss, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_store_logs_ops() {
        let store = RecordingStore::new();
        store.set("a", b"1").await.unwrap();
        store.get("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(
            store.ops(),
            vec![
                StoreOp::Set("a".to_string()),
                StoreOp::Get("a".to_string()),
                StoreOp::Delete("a".to_string()),
            ]
        );
        assert_eq!(store.writes(), vec!["a".to_string()]);
        assert_eq!(store.deletes(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_store_modes() {
        let store = FailingStore::new();
        assertions::assert_transport_error(&store.get("a").await);

        let store = FailingStore::with_mode(FailureMode::Writes);
        store.inner().set("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assertions::assert_transport_error(&store.set("a", b"2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_delays() {
        let store = SlowStore::new(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        store.set("a", b"1").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_fixtures() {
        let query = fixtures::equality_query(&[("email", "a@x.com")]);
        assert_eq!(query.cache_value(), Some("a@x.com"));
        assert!(query.default_cacheable());
        assert_eq!(fixtures::default_user().len(), 2);
    }
}
