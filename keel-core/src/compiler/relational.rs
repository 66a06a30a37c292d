//! Relational target: query text with positional placeholders.

use serde_json::Value;

use super::{Joiner, Representation};
use crate::error::CompileError;
use crate::predicate::{Condition, Operator};

/// Query text plus the parameters bound to its placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct SqlFragment {
    text: String,
    parameters: Vec<Value>,
}

impl SqlFragment {
    pub(super) fn from_representation(representation: Representation) -> Self {
        match representation {
            Representation::Relational { text, parameters } => Self { text, parameters },
            // Targets are checked before fragments are combined.
            Representation::Document(_) => Self::default(),
        }
    }

    pub(super) fn into_representation(self) -> Representation {
        Representation::Relational {
            text: self.text,
            parameters: self.parameters,
        }
    }

    fn push(&mut self, text: &str, parameters: Vec<Value>) {
        self.text.push_str(text);
        self.parameters.extend(parameters);
    }
}

fn scalar_symbol(operator: Operator) -> &'static str {
    match operator {
        Operator::Equal => "=",
        Operator::NotEqual => "!=",
        Operator::GreaterThan => ">",
        Operator::GreaterThanEqual => ">=",
        Operator::LesserThan => "<",
        Operator::LesserThanEqual => "<=",
        Operator::Like => "LIKE",
        Operator::NotLike => "NOT LIKE",
        Operator::In => "IN",
        Operator::NotIn => "NOT IN",
        Operator::IsNull => "IS NULL",
        Operator::IsNotNull => "IS NOT NULL",
    }
}

/// Render one leaf condition.
pub(super) fn leaf(cond: &Condition, placeholder: &str) -> Result<SqlFragment, CompileError> {
    let symbol = scalar_symbol(cond.operator);
    match cond.operator {
        Operator::IsNull | Operator::IsNotNull => Ok(SqlFragment {
            text: format!("{} {}", cond.field, symbol),
            parameters: Vec::new(),
        }),
        Operator::In | Operator::NotIn => {
            let Value::Array(values) = &cond.value else {
                return Err(CompileError::NotASequence {
                    field: cond.field.clone(),
                    operator: cond.operator.name().to_string(),
                });
            };
            if values.is_empty() {
                return Err(CompileError::EmptySequence {
                    field: cond.field.clone(),
                    operator: cond.operator.name().to_string(),
                });
            }
            let placeholders = vec![placeholder; values.len()].join(",");
            Ok(SqlFragment {
                text: format!("{} {} ({})", cond.field, symbol, placeholders),
                parameters: values.clone(),
            })
        }
        _ => Ok(SqlFragment {
            text: format!("{} {} {}", cond.field, symbol, placeholder),
            parameters: vec![cond.value.clone()],
        }),
    }
}

/// Join non-empty fragments with `joiner`.
pub(super) fn join(children: Vec<SqlFragment>, joiner: Joiner) -> SqlFragment {
    let mut out = SqlFragment::default();
    for child in children.into_iter().filter(|c| !c.text.is_empty()) {
        if !out.text.is_empty() {
            out.text.push_str(joiner.sql());
        }
        out.push(&child.text, child.parameters);
    }
    out
}

/// Concatenate fragments verbatim, each prefixed by its own leading joiner
/// except the first.
pub(super) fn concat(children: Vec<(Option<Joiner>, SqlFragment)>) -> SqlFragment {
    let mut out = SqlFragment::default();
    for (index, (leading, child)) in children.into_iter().enumerate() {
        if index > 0 {
            if let Some(joiner) = leading {
                out.text.push_str(joiner.sql());
            }
        }
        out.push(&child.text, child.parameters);
    }
    out
}

/// Wrap a fragment in parentheses. Empty stays empty.
pub(super) fn group(child: SqlFragment) -> SqlFragment {
    if child.text.is_empty() {
        return child;
    }
    SqlFragment {
        text: format!("({})", child.text),
        parameters: child.parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(field: &str, operator: Operator, value: Value) -> SqlFragment {
        leaf(&Condition::new(field, operator, value), "?").unwrap()
    }

    #[test]
    fn test_scalar_operators() {
        let cases = [
            (Operator::Equal, "x = ?"),
            (Operator::NotEqual, "x != ?"),
            (Operator::GreaterThan, "x > ?"),
            (Operator::GreaterThanEqual, "x >= ?"),
            (Operator::LesserThan, "x < ?"),
            (Operator::LesserThanEqual, "x <= ?"),
            (Operator::Like, "x LIKE ?"),
            (Operator::NotLike, "x NOT LIKE ?"),
        ];
        for (operator, expected) in cases {
            let fragment = render("x", operator, json!("v"));
            assert_eq!(fragment.text, expected);
            assert_eq!(fragment.parameters, vec![json!("v")]);
        }
    }

    #[test]
    fn test_sequence_operators() {
        let fragment = render("id", Operator::In, json!([1, 2, 3]));
        assert_eq!(fragment.text, "id IN (?,?,?)");
        assert_eq!(fragment.parameters, vec![json!(1), json!(2), json!(3)]);

        let fragment = render("id", Operator::NotIn, json!(["a"]));
        assert_eq!(fragment.text, "id NOT IN (?)");
    }

    #[test]
    fn test_null_checks_bind_nothing() {
        let fragment = render("deleted_at", Operator::IsNull, Value::Null);
        assert_eq!(fragment.text, "deleted_at IS NULL");
        assert!(fragment.parameters.is_empty());

        let fragment = render("deleted_at", Operator::IsNotNull, Value::Null);
        assert_eq!(fragment.text, "deleted_at IS NOT NULL");
    }

    #[test]
    fn test_in_requires_sequence() {
        let err = leaf(&Condition::new("id", Operator::In, 5), "?").unwrap_err();
        assert!(matches!(err, CompileError::NotASequence { .. }));

        let err = leaf(&Condition::new("id", Operator::NotIn, json!([])), "?").unwrap_err();
        assert!(matches!(err, CompileError::EmptySequence { .. }));
    }

    #[test]
    fn test_group_of_empty_is_empty() {
        assert_eq!(group(SqlFragment::default()), SqlFragment::default());
    }
}
