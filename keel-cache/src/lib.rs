//! KEEL Cache - Cache-Aside Orchestration
//!
//! Keeps composite secondary indexes over cached records so equality
//! predicates can be answered without the primary store:
//!
//! ```text
//! <db>_<entity>_<index values>  ->  record id  ->  encoded record
//! ```
//!
//! Predicates compiled by `keel-core` carry a [`keel_core::CacheSignature`];
//! its `cache_value` addresses index pointers and its `cache_key` addresses
//! cached query results.
//!
//! # Design
//!
//! - The store is a plain byte store ([`CacheStore`]); key layout lives in
//!   [`keys`] and nowhere else.
//! - A miss is `Ok(None)`. Store failures are errors and are never folded
//!   into misses, so callers can choose between degrading to the primary
//!   store and propagating.
//! - Every store operation passes through a shared [`CapacityGate`] and runs
//!   under a [`CacheContext`] deadline/cancellation.

pub mod codec;
pub mod config;
pub mod gate;
pub mod id;
pub mod index;
pub mod keys;
pub mod orchestrator;
pub mod read;
pub mod store;

pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{CacheConfig, CacheErrorPolicy, DEFAULT_MAX_COMPOSITE_FIELDS, DEFAULT_MAX_INDEXES};
pub use gate::{CacheContext, CancelToken, CapacityGate, GatePermit};
pub use id::{IdGenerator, RecordId, UuidV7Generator};
pub use index::{parse_definitions, CompositeIndex};
pub use keys::KeySpace;
pub use orchestrator::CacheAside;
pub use read::{CacheRead, PrimaryFetcher, ReadOptions, ReadSource};
pub use store::{CacheStats, CacheStore, InMemoryCacheStore, LmdbCacheStore, LmdbStoreError};
