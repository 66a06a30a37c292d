//! Cache configuration.
//!
//! Configuration is built in code (`CacheConfig::new().with_*`) or loaded
//! from environment variables with defaults suited to development.

use std::time::Duration;

use keel_core::{ConfigError, KeelResult};

/// Maximum composite index definitions per entity.
pub const DEFAULT_MAX_INDEXES: usize = 10;

/// Maximum fields per composite index definition.
pub const DEFAULT_MAX_COMPOSITE_FIELDS: usize = 5;

/// What the read policy does when the cache store is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheErrorPolicy {
    /// Log the transport error and continue against the primary store.
    #[default]
    Degrade,
    /// Return the transport error to the caller.
    Propagate,
}

impl CacheErrorPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "degrade" => Some(Self::Degrade),
            "propagate" => Some(Self::Propagate),
            _ => None,
        }
    }
}

/// Configuration for the cache-aside orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Ceiling on simultaneous in-flight cache store operations.
    pub max_in_flight: usize,
    /// Deadline applied to operations whose context carries none.
    pub op_timeout: Option<Duration>,
    /// Maximum composite index definitions per entity.
    pub max_indexes: usize,
    /// Maximum fields per composite index definition.
    pub max_composite_fields: usize,
    /// Read-policy reaction to transport errors.
    pub on_cache_error: CacheErrorPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            op_timeout: Some(Duration::from_secs(5)),
            max_indexes: DEFAULT_MAX_INDEXES,
            max_composite_fields: DEFAULT_MAX_COMPOSITE_FIELDS,
            on_cache_error: CacheErrorPolicy::Degrade,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-flight operation ceiling.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the default per-operation timeout. `None` disables it.
    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the composite index limits.
    pub fn with_index_limits(mut self, max_indexes: usize, max_composite_fields: usize) -> Self {
        self.max_indexes = max_indexes;
        self.max_composite_fields = max_composite_fields;
        self
    }

    /// Set the transport error policy for reads.
    pub fn with_error_policy(mut self, policy: CacheErrorPolicy) -> Self {
        self.on_cache_error = policy;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KEEL_CACHE_MAX_IN_FLIGHT`: In-flight operation ceiling (default: 64)
    /// - `KEEL_CACHE_OP_TIMEOUT_MS`: Per-operation deadline, `0` disables (default: 5000)
    /// - `KEEL_CACHE_MAX_INDEXES`: Composite indexes per entity (default: 10)
    /// - `KEEL_CACHE_MAX_COMPOSITE_FIELDS`: Fields per composite index (default: 5)
    /// - `KEEL_CACHE_ON_ERROR`: "degrade" or "propagate" (default: degrade)
    pub fn from_env() -> KeelResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> KeelResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_in_flight = parse_var(&lookup, "KEEL_CACHE_MAX_IN_FLIGHT")?
            .unwrap_or(defaults.max_in_flight);

        let op_timeout = match parse_var::<u64, _>(&lookup, "KEEL_CACHE_OP_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.op_timeout,
        };

        let max_indexes =
            parse_var(&lookup, "KEEL_CACHE_MAX_INDEXES")?.unwrap_or(defaults.max_indexes);

        let max_composite_fields = parse_var(&lookup, "KEEL_CACHE_MAX_COMPOSITE_FIELDS")?
            .unwrap_or(defaults.max_composite_fields);

        let on_cache_error = match lookup("KEEL_CACHE_ON_ERROR") {
            Some(raw) => CacheErrorPolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                field: "KEEL_CACHE_ON_ERROR".to_string(),
                value: raw.clone(),
                reason: "expected \"degrade\" or \"propagate\"".to_string(),
            })?,
            None => defaults.on_cache_error,
        };

        let config = Self {
            max_in_flight,
            op_timeout,
            max_indexes,
            max_composite_fields,
            on_cache_error,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> KeelResult<()> {
        let checks = [
            ("max_in_flight", self.max_in_flight),
            ("max_indexes", self.max_indexes),
            ("max_composite_fields", self.max_composite_fields),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> KeelResult<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            }
            .into()
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::KeelError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.op_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_indexes, 10);
        assert_eq!(config.max_composite_fields, 5);
        assert_eq!(config.on_cache_error, CacheErrorPolicy::Degrade);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_max_in_flight(8)
            .with_op_timeout(None)
            .with_index_limits(3, 2)
            .with_error_policy(CacheErrorPolicy::Propagate);

        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.op_timeout, None);
        assert_eq!(config.max_indexes, 3);
        assert_eq!(config.max_composite_fields, 2);
        assert_eq!(config.on_cache_error, CacheErrorPolicy::Propagate);
    }

    #[test]
    fn test_from_lookup_reads_all_variables() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("KEEL_CACHE_MAX_IN_FLIGHT", "16"),
            ("KEEL_CACHE_OP_TIMEOUT_MS", "0"),
            ("KEEL_CACHE_MAX_INDEXES", "4"),
            ("KEEL_CACHE_MAX_COMPOSITE_FIELDS", "3"),
            ("KEEL_CACHE_ON_ERROR", "Propagate"),
        ]))
        .unwrap();

        assert_eq!(config.max_in_flight, 16);
        assert_eq!(config.op_timeout, None);
        assert_eq!(config.max_indexes, 4);
        assert_eq!(config.max_composite_fields, 3);
        assert_eq!(config.on_cache_error, CacheErrorPolicy::Propagate);
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        let config = CacheConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = CacheConfig::from_lookup(lookup_from(&[("KEEL_CACHE_MAX_IN_FLIGHT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, KeelError::Config(_)));

        let err = CacheConfig::from_lookup(lookup_from(&[("KEEL_CACHE_MAX_IN_FLIGHT", "0")]))
            .unwrap_err();
        assert!(matches!(err, KeelError::Config(_)));

        let err = CacheConfig::from_lookup(lookup_from(&[("KEEL_CACHE_ON_ERROR", "ignore")]))
            .unwrap_err();
        assert!(matches!(err, KeelError::Config(_)));
    }
}
