//! Predicate trees
//!
//! A predicate is described once as a tree of leaf conditions joined by
//! AND/OR/GROUP nodes, then handed to a [`Compiler`](crate::Compiler) for
//! whichever target representation the caller needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Comparison operator for a leaf condition.
///
/// The set is closed: every compiler target lowers all twelve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LesserThan,
    LesserThanEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// All operators, in declaration order.
    pub const ALL: [Operator; 12] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterThan,
        Operator::GreaterThanEqual,
        Operator::LesserThan,
        Operator::LesserThanEqual,
        Operator::Like,
        Operator::NotLike,
        Operator::In,
        Operator::NotIn,
        Operator::IsNull,
        Operator::IsNotNull,
    ];

    /// Uppercase operator name, as used in cache keys.
    pub fn name(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanEqual => "GREATER_THAN_EQUAL",
            Self::LesserThan => "LESSER_THAN",
            Self::LesserThanEqual => "LESSER_THAN_EQUAL",
            Self::Like => "LIKE",
            Self::NotLike => "NOT_LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::IsNull => "IS_NULL",
            Self::IsNotNull => "IS_NOT_NULL",
        }
    }

    /// Only equality leaves are eligible for the composite-index fast path.
    pub fn is_default_cacheable(self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Operators whose value must be an ordered sequence.
    pub fn takes_sequence(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Operators that carry no value at all.
    pub fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single `field OP value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub operator: Operator,
    /// Value to compare against (JSON value for flexibility)
    pub value: Value,
}

impl Condition {
    /// Create a new condition.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// One field, one operator, one value.
    Leaf(Condition),
    /// Children joined with AND.
    And(Vec<Predicate>),
    /// Children joined with OR.
    Or(Vec<Predicate>),
    /// Parenthesized sub-tree.
    Group(Box<Predicate>),
}

impl Predicate {
    /// Create a leaf predicate.
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(Condition::new(field, operator, value))
    }

    /// Create an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Equal, value)
    }

    /// Create a not-equal predicate.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::NotEqual, value)
    }

    /// Create a greater-than predicate.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::GreaterThan, value)
    }

    /// Create a greater-than-or-equal predicate.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::GreaterThanEqual, value)
    }

    /// Create a less-than predicate.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::LesserThan, value)
    }

    /// Create a less-than-or-equal predicate.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::LesserThanEqual, value)
    }

    /// Create a LIKE predicate (`%` matches any run, `_` one character).
    pub fn like(field: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::Like, pattern)
    }

    /// Create a NOT LIKE predicate.
    pub fn not_like(field: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::NotLike, pattern)
    }

    /// Create an IN predicate. `values` should be an array.
    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::In, values)
    }

    /// Create a NOT IN predicate. `values` should be an array.
    pub fn not_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::leaf(field, Operator::NotIn, values)
    }

    /// Create an IS NULL predicate.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNull, Value::Null)
    }

    /// Create an IS NOT NULL predicate.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::leaf(field, Operator::IsNotNull, Value::Null)
    }

    /// Join children with AND.
    pub fn and(children: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And(children.into_iter().collect())
    }

    /// Join children with OR.
    pub fn or(children: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    /// Parenthesize a sub-tree.
    pub fn group(inner: Predicate) -> Self {
        Self::Group(Box::new(inner))
    }

    /// Visit every leaf condition in traversal order.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Self::Leaf(cond) => out.push(cond),
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Self::Group(inner) => inner.collect_leaves(out),
        }
    }
}

impl From<Condition> for Predicate {
    fn from(cond: Condition) -> Self {
        Self::Leaf(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_names_are_uppercase() {
        for op in Operator::ALL {
            assert_eq!(op.name(), op.name().to_uppercase());
        }
        assert_eq!(Operator::GreaterThanEqual.name(), "GREATER_THAN_EQUAL");
    }

    #[test]
    fn test_operator_serde_matches_name() {
        for op in Operator::ALL {
            let encoded = serde_json::to_value(op).unwrap();
            assert_eq!(encoded, json!(op.name()));
        }
    }

    #[test]
    fn test_only_equal_is_default_cacheable() {
        let cacheable: Vec<_> = Operator::ALL
            .into_iter()
            .filter(|op| op.is_default_cacheable())
            .collect();
        assert_eq!(cacheable, vec![Operator::Equal]);
    }

    #[test]
    fn test_leaves_in_traversal_order() {
        let tree = Predicate::and([
            Predicate::eq("a", 1),
            Predicate::group(Predicate::or([Predicate::eq("b", 2), Predicate::gt("c", 3)])),
        ]);
        let fields: Vec<_> = tree.leaves().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
