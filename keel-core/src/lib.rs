//! KEEL Core - Predicates, Condition Compiler, Cache Signatures
//!
//! Callers describe a filter once as a [`Predicate`] tree and compile it for
//! a relational or document-store target. Every compilation also yields a
//! [`CacheSignature`], which the cache layer (`keel-cache`) uses as its
//! lookup key.
//!
//! ```
//! use keel_core::{Compiler, Predicate};
//!
//! let query = Compiler::relational()
//!     .compile(&Predicate::and([
//!         Predicate::eq("age", 30),
//!         Predicate::gt("score", 10),
//!     ]))
//!     .unwrap();
//!
//! assert_eq!(query.sql(), Some("age = ? AND score > ?"));
//! assert!(!query.default_cacheable());
//! ```

pub mod compiler;
pub mod error;
pub mod predicate;
pub mod signature;

pub use compiler::{
    Clause, CompiledQuery, Compiler, CompilerConfig, Joiner, Representation, Target,
};
pub use error::{CacheError, CompileError, ConfigError, IndexError, KeelError, KeelResult};
pub use predicate::{Condition, Operator, Predicate};
pub use signature::{value_token, CacheSignature, KEY_SEPARATOR};

/// Ordered mapping of field name to value for one record.
///
/// Supplied by the record-mapping layer; the cache layer derives composite
/// index keys from it and stores it as the record payload.
pub type FieldValues = serde_json::Map<String, serde_json::Value>;
