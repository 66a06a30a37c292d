//! Read policy types.
//!
//! A find request names how it wants the cache treated ([`ReadOptions`]) and
//! gets back a [`CacheRead`] that says where the value came from. The
//! primary store is reached through a [`PrimaryFetcher`] supplied by the
//! caller.

use async_trait::async_trait;
use keel_core::{CompiledQuery, KeelResult};

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Equality fast path: index pointer, then record payload.
    IndexPointer,
    /// Cached result of this exact predicate.
    QuerySignature,
    /// The primary store.
    Primary,
}

impl ReadSource {
    pub fn is_cache(self) -> bool {
        !matches!(self, Self::Primary)
    }
}

/// Caller choices for one find request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Skip the cache entirely and read the primary store.
    pub force_primary: bool,
    /// After a primary read, store the result under the query signature.
    pub cache_result: bool,
    /// Skip the equality fast path. Set this when `T` is a collection: index
    /// pointers resolve to a single record.
    pub skip_index_lookup: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypass the cache.
    pub fn force_primary(mut self) -> Self {
        self.force_primary = true;
        self
    }

    /// Go straight to the query-result cache, never to index pointers.
    pub fn without_index_lookup(mut self) -> Self {
        self.skip_index_lookup = true;
        self
    }

    /// Populate the query-result cache after a primary read.
    pub fn with_cache_result(mut self, cache_result: bool) -> Self {
        self.cache_result = cache_result;
        self
    }
}

/// Result of a find, tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, source: ReadSource) -> Self {
        Self { value, source }
    }

    /// Value read from the primary store.
    pub fn from_primary(value: T) -> Self {
        Self::new(value, ReadSource::Primary)
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source.is_cache()
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Primary store access for cache misses.
///
/// Implemented by the data-access layer over whatever driver executes the
/// compiled query.
#[async_trait]
pub trait PrimaryFetcher<T>: Send + Sync {
    /// Run `query` against the primary store. `None` when nothing matches.
    async fn fetch(&self, query: &CompiledQuery) -> KeelResult<Option<T>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_options_builders() {
        let options = ReadOptions::new();
        assert!(!options.force_primary);
        assert!(!options.cache_result);

        let options = ReadOptions::new().force_primary().with_cache_result(true);
        assert!(options.force_primary);
        assert!(options.cache_result);
    }

    #[test]
    fn test_cache_read_source() {
        let read = CacheRead::new(1, ReadSource::IndexPointer);
        assert!(read.was_cache_hit());
        let read = CacheRead::new(1, ReadSource::QuerySignature);
        assert!(read.was_cache_hit());
        let read = CacheRead::from_primary(1);
        assert!(!read.was_cache_hit());
        assert_eq!(read.source(), ReadSource::Primary);
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::new(42i32, ReadSource::QuerySignature);
        let mapped = read.map(|v| v.to_string());
        assert_eq!(mapped.source(), ReadSource::QuerySignature);
        assert_eq!(mapped.into_value(), "42");
    }
}
