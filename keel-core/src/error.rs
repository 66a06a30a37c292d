//! Error types for KEEL operations

use crate::compiler::Target;
use thiserror::Error;

/// Condition compilation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{construct} is not supported by the {target} target")]
    Unsupported {
        target: Target,
        construct: &'static str,
    },

    #[error("Operator {operator} on field {field} requires a sequence value")]
    NotASequence { field: String, operator: String },

    #[error("Operator {operator} on field {field} requires at least one value")]
    EmptySequence { field: String, operator: String },

    #[error("Cannot combine a {found} fragment into a {expected} query")]
    TargetMismatch { expected: Target, found: Target },
}

/// Composite index declaration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Too many composite indexes: {count} declared, at most {max} allowed")]
    TooManyIndexes { count: usize, max: usize },

    #[error("Too many fields in composite index '{definition}': {count} declared, at most {max} allowed")]
    TooManyCompositeFields {
        definition: String,
        count: usize,
        max: usize,
    },

    #[error("Composite index definition '{definition}' names no fields")]
    EmptyDefinition { definition: String },
}

/// Cache store and codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache transport failed: {reason}")]
    Transport { reason: String },

    #[error("Cache operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Cache operation cancelled")]
    Cancelled,

    #[error("Cache capacity gate closed")]
    GateClosed,

    #[error("Failed to encode cache payload: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode cache payload at {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl CacheError {
    /// True when the error came from the store or the capacity gate rather
    /// than from payload encoding.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Cancelled | Self::GateClosed
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all KEEL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeelError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl KeelError {
    /// True for store transport failures (unreachable, timed out, cancelled).
    ///
    /// Callers use this to tell "cache unavailable" apart from configuration
    /// mistakes and corrupt payloads.
    pub fn is_cache_transport(&self) -> bool {
        matches!(self, Self::Cache(e) if e.is_transport())
    }
}

/// Result type alias for KEEL operations.
pub type KeelResult<T> = Result<T, KeelError>;

// =============================================================================
// TESTS
// =============================================================================
