//! Property-Based Tests for the Cache-Aside Orchestrator
//!
//! Properties:
//! - Insert followed by an equality lookup over any declared definition
//!   returns the inserted record.
//! - Over-limit declarations fail before any store write.
//! - Transport failures surface as errors, never as misses.
//! - Any compiled predicate's result can be cached and read back under its
//!   signature.
//! - After an update, only pointers for the new values resolve, and all of
//!   them reach the same record identifier.

use std::sync::Arc;
use std::time::Duration;

use keel_cache::{
    CacheAside, CacheConfig, CacheContext, CacheStore, LmdbCacheStore, ReadOptions, ReadSource,
};
use keel_core::{Compiler, FieldValues, IndexError, KeelError, Predicate};
use keel_test_utils::assertions::{
    assert_decode_error, assert_index_error, assert_miss, assert_transport_error,
};
use keel_test_utils::fixtures::{
    default_user, equality_query, user_definitions, user_record, DATABASE, ENTITY,
};
use keel_test_utils::generators::{arb_field_values, arb_index_definitions, arb_predicate};
use keel_test_utils::{cache_over, FailingStore, RecordingStore, SlowStore};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Equality query over the fields of one definition, in declared order.
fn query_for(definition: &str, record: &FieldValues) -> keel_core::CompiledQuery {
    let leaves = definition
        .split(',')
        .map(|field| Predicate::eq(field, record[field].clone()));
    Compiler::relational()
        .compile(&Predicate::and(leaves))
        .unwrap()
}

/// A record plus definitions drawn from its own fields.
fn arb_indexed_record() -> impl Strategy<Value = (FieldValues, Vec<String>)> {
    arb_field_values().prop_flat_map(|record| {
        let fields: Vec<String> = record.keys().cloned().collect();
        (Just(record), arb_index_definitions(fields, 10, 5))
    })
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_insert_then_lookup_round_trips((record, definitions) in arb_indexed_record()) {
        let rt = runtime();
        let store = Arc::new(RecordingStore::new());
        let cache = cache_over(Arc::clone(&store));
        let ctx = CacheContext::background();

        let id = rt
            .block_on(cache.record_insert(&ctx, &definitions, &record, DATABASE, ENTITY))
            .unwrap();
        prop_assert!(id.is_some());

        for definition in &definitions {
            let query = query_for(definition, &record);
            let found: Option<FieldValues> = rt
                .block_on(cache.lookup_by_equality(&ctx, &query, DATABASE, ENTITY))
                .unwrap();
            prop_assert_eq!(found.as_ref(), Some(&record));
        }
    }

    #[test]
    fn prop_insert_shares_one_identifier((record, definitions) in arb_indexed_record()) {
        let rt = runtime();
        let store = Arc::new(RecordingStore::new());
        let cache = cache_over(Arc::clone(&store));
        let ctx = CacheContext::background();

        let id = rt
            .block_on(cache.record_insert(&ctx, &definitions, &record, DATABASE, ENTITY))
            .unwrap()
            .unwrap();

        let writes = store.writes();
        prop_assert_eq!(writes.last(), Some(&id.as_str().to_string()));
        for key in &writes[..writes.len() - 1] {
            let pointer = rt.block_on(store.inner().get(key)).unwrap();
            prop_assert_eq!(pointer, Some(id.as_bytes().to_vec()));
        }
    }

    #[test]
    fn prop_over_limit_declarations_write_nothing(
        record in arb_field_values(),
        extra in 1usize..5,
    ) {
        let rt = runtime();
        let store = Arc::new(RecordingStore::new());
        let cache = cache_over(Arc::clone(&store));
        let ctx = CacheContext::background();

        let field = record.keys().next().cloned().unwrap();
        let definitions: Vec<String> = vec![field; 10 + extra];
        let result =
            rt.block_on(cache.record_insert(&ctx, &definitions, &record, DATABASE, ENTITY));
        prop_assert_eq!(
            result,
            Err(KeelError::Index(IndexError::TooManyIndexes { count: 10 + extra, max: 10 }))
        );

        let wide = (0..5 + extra).map(|i| format!("f{i}")).collect::<Vec<_>>().join(",");
        let result = rt.block_on(cache.record_insert(&ctx, &[wide], &record, DATABASE, ENTITY));
        assert_index_error(&result);

        prop_assert!(store.writes().is_empty());
    }

    #[test]
    fn prop_transport_failure_is_never_a_miss((record, definitions) in arb_indexed_record()) {
        let rt = runtime();
        let cache = cache_over(Arc::new(FailingStore::new()));
        let ctx = CacheContext::background();

        assert_transport_error(
            &rt.block_on(cache.record_insert(&ctx, &definitions, &record, DATABASE, ENTITY)),
        );
        let query = query_for(&definitions[0], &record);
        assert_transport_error(
            &rt.block_on(cache.lookup_by_equality::<FieldValues>(&ctx, &query, DATABASE, ENTITY)),
        );
        let by_signature = rt.block_on(
            cache.lookup_by_query_signature::<FieldValues>(&ctx, &query, DATABASE, ENTITY),
        );
        assert_transport_error(&by_signature);
    }

    #[test]
    fn prop_query_results_round_trip_under_signature(
        tree in arb_predicate(),
        rows in prop::collection::vec(arb_field_values(), 0..4),
    ) {
        let rt = runtime();
        let cache = cache_over(Arc::new(RecordingStore::new()));
        let ctx = CacheContext::background();
        let query = Compiler::relational().compile(&tree).unwrap();

        let stored = rt
            .block_on(cache.store_query_result(&ctx, &query, DATABASE, ENTITY, &rows))
            .unwrap();
        prop_assert!(stored);

        let found: Option<Vec<FieldValues>> = rt
            .block_on(cache.lookup_by_query_signature(&ctx, &query, DATABASE, ENTITY))
            .unwrap();
        prop_assert_eq!(found, Some(rows));
    }

    #[test]
    fn prop_update_repoints_indexes(
        (old, definitions) in arb_indexed_record(),
        replacement in any::<u32>(),
    ) {
        let rt = runtime();
        let store = Arc::new(RecordingStore::new());
        let cache = cache_over(Arc::clone(&store));
        let ctx = CacheContext::background();

        let id = rt
            .block_on(cache.record_insert(&ctx, &definitions, &old, DATABASE, ENTITY))
            .unwrap()
            .unwrap();

        // Change the first field to a value no generated string can take.
        let mut new = old.clone();
        let changed = old.keys().next().cloned().unwrap();
        new.insert(changed, serde_json::json!(format!("updated-{replacement}")));

        let reused = rt
            .block_on(cache.record_update(&ctx, &old, &new, &definitions, DATABASE, ENTITY))
            .unwrap();
        prop_assert_eq!(reused.as_ref(), Some(&id));

        for definition in &definitions {
            let fresh_query = query_for(definition, &new);
            let fresh: Option<FieldValues> = rt
                .block_on(cache.lookup_by_equality(&ctx, &fresh_query, DATABASE, ENTITY))
                .unwrap();
            prop_assert_eq!(fresh.as_ref(), Some(&new));

            // Two definitions can share a pointer key when their values coincide.
            let old_query = query_for(definition, &old);
            let still_indexed = definitions
                .iter()
                .any(|d| query_for(d, &new).cache_value() == old_query.cache_value());
            if !still_indexed {
                let stale = rt.block_on(
                    cache.lookup_by_equality::<FieldValues>(&ctx, &old_query, DATABASE, ENTITY),
                );
                assert_miss(&stale);
            }
        }
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_user_insert_scenario() {
    keel_test_utils::init_tracing();
    let store = Arc::new(RecordingStore::new());
    let cache = cache_over(Arc::clone(&store));
    let ctx = CacheContext::background();

    let id = cache
        .record_insert(&ctx, &user_definitions(), &default_user(), DATABASE, ENTITY)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        store.writes(),
        vec![
            "db1_users_a@x.com".to_string(),
            "db1_users_a@x.com_p".to_string(),
            id.as_str().to_string(),
        ]
    );

    let found: Option<FieldValues> = cache
        .lookup_by_equality(&ctx, &equality_query(&[("email", "a@x.com")]), DATABASE, ENTITY)
        .await
        .unwrap();
    assert_eq!(found, Some(default_user()));
}

#[tokio::test]
async fn test_schema_drift_is_decode_error_not_miss() {
    let store = Arc::new(RecordingStore::new());
    let cache = cache_over(Arc::clone(&store));
    let ctx = CacheContext::background();

    let id = cache
        .record_insert(&ctx, &user_definitions(), &default_user(), DATABASE, ENTITY)
        .await
        .unwrap()
        .unwrap();
    store.inner().set(id.as_str(), b"[1, 2, 3]").await.unwrap();

    let query = equality_query(&[("email", "a@x.com")]);
    let result = cache
        .lookup_by_equality::<FieldValues>(&ctx, &query, DATABASE, ENTITY)
        .await;
    assert_decode_error(&result);
}

#[tokio::test]
async fn test_lmdb_indexes_long_field_values() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = LmdbCacheStore::open(dir.path(), 10).unwrap();
    let cache = CacheAside::new(Arc::new(store), CacheConfig::default()).unwrap();
    let ctx = CacheContext::background();

    let bio = "x".repeat(600);
    let mut record = default_user();
    record.insert("bio".to_string(), serde_json::json!(bio));

    let id = cache
        .record_insert(&ctx, &["bio"], &record, DATABASE, ENTITY)
        .await
        .unwrap();
    assert!(id.is_some());

    let found: Option<FieldValues> = cache
        .lookup_by_equality(&ctx, &equality_query(&[("bio", bio.as_str())]), DATABASE, ENTITY)
        .await
        .unwrap();
    assert_eq!(found, Some(record));
}

#[tokio::test]
async fn test_find_read_through_and_populate() {
    struct Primary;

    #[async_trait::async_trait]
    impl keel_cache::PrimaryFetcher<Vec<FieldValues>> for Primary {
        async fn fetch(
            &self,
            _query: &keel_core::CompiledQuery,
        ) -> keel_core::KeelResult<Option<Vec<FieldValues>>> {
            Ok(Some(vec![user_record("b@x.com", "q")]))
        }
    }

    let store = Arc::new(RecordingStore::new());
    let cache = cache_over(Arc::clone(&store));
    let ctx = CacheContext::background();
    let query = Compiler::relational()
        .compile(&Predicate::like("email", "%@x.com"))
        .unwrap();
    let options = ReadOptions::new().with_cache_result(true);

    let first = cache
        .find(&ctx, &query, DATABASE, ENTITY, options, &Primary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.source(), ReadSource::Primary);
    assert_eq!(store.writes(), vec!["db1_users_LIKE_%@x.com".to_string()]);

    let second = cache
        .find(&ctx, &query, DATABASE, ENTITY, options, &Primary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.source(), ReadSource::QuerySignature);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_hits_deadline_and_releases_capacity() {
    let config = CacheConfig::default()
        .with_max_in_flight(1)
        .with_op_timeout(Some(Duration::from_millis(100)));
    let cache = CacheAside::new(Arc::new(SlowStore::new(Duration::from_secs(5))), config).unwrap();
    let ctx = CacheContext::background();

    let result = cache
        .record_insert(&ctx, &["email"], &default_user(), DATABASE, ENTITY)
        .await;
    assert!(matches!(
        result,
        Err(KeelError::Cache(keel_core::CacheError::Timeout { .. }))
    ));
    assert_eq!(cache.gate().available(), 1);
}
