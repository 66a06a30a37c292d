//! Cache signatures derived during compilation.
//!
//! Every compiled fragment carries a [`CacheSignature`]:
//!
//! - `cache_key`: `<OPERATOR>_<value>` tokens for every leaf, in traversal
//!   order, joined by `_`. Keys query-result cache entries.
//! - `cache_value`: the raw leaf values only, joined by `_`. Keys
//!   composite-index lookups, so it must line up with the index keys the
//!   cache layer builds from record field values.
//! - `default_cacheable`: true only while every leaf is `EQUAL`. Monotonic:
//!   once a merge sees a false side, the result stays false.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::predicate::Condition;

/// Separator between signature tokens and between composite index values.
pub const KEY_SEPARATOR: &str = "_";

/// The `(cache_key, cache_value, default_cacheable)` triple of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheSignature {
    cache_key: String,
    cache_value: String,
    default_cacheable: bool,
}

impl CacheSignature {
    /// Signature of a single leaf condition.
    pub fn for_condition(cond: &Condition) -> Self {
        let value = value_token(&cond.value);
        Self {
            cache_key: format!("{}{}{}", cond.operator.name(), KEY_SEPARATOR, value),
            cache_value: value,
            default_cacheable: cond.operator.is_default_cacheable(),
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn cache_value(&self) -> &str {
        &self.cache_value
    }

    pub fn default_cacheable(&self) -> bool {
        self.default_cacheable
    }

    /// Append `other` after `self` in traversal order.
    pub fn extend(&mut self, other: &CacheSignature) {
        self.cache_key.push_str(KEY_SEPARATOR);
        self.cache_key.push_str(&other.cache_key);
        self.cache_value.push_str(KEY_SEPARATOR);
        self.cache_value.push_str(&other.cache_value);
        self.default_cacheable &= other.default_cacheable;
    }

    /// Concatenate signatures in order, skipping unset ones.
    ///
    /// Returns `None` when every input is unset.
    pub fn concat<'a>(parts: impl IntoIterator<Item = Option<&'a CacheSignature>>) -> Option<Self> {
        let mut merged: Option<Self> = None;
        for part in parts.into_iter().flatten() {
            match merged.as_mut() {
                Some(acc) => acc.extend(part),
                None => merged = Some(part.clone()),
            }
        }
        merged
    }
}

/// String form of a leaf value as it appears in signatures and index keys.
///
/// Strings are used verbatim, so `"a@x.com"` contributes `a@x.com` rather
/// than its quoted JSON form. Everything else uses compact JSON.
pub fn value_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
