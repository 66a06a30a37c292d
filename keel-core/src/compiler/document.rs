//! Document target: structured filter documents.
//!
//! Leaves render as `{field: {"$op": value}}`; joins render as `$and`/`$or`
//! arrays. A join with a single child collapses to that child.

use serde_json::{json, Map, Value};

use super::{Joiner, Representation};
use crate::predicate::{Condition, Operator};
use crate::signature::value_token;

pub(super) fn from_representation(representation: Representation) -> Map<String, Value> {
    match representation {
        Representation::Document(doc) => doc,
        // Targets are checked before fragments are combined.
        Representation::Relational { .. } => Map::new(),
    }
}

/// Render one leaf condition.
///
/// Returns `None` when the condition cannot be expressed and is skipped:
/// IN/NOT_IN with a non-sequence value.
pub(super) fn leaf(cond: &Condition) -> Option<Map<String, Value>> {
    let clause = match cond.operator {
        Operator::Equal => json!({ "$eq": cond.value }),
        Operator::NotEqual => json!({ "$ne": cond.value }),
        Operator::GreaterThan => json!({ "$gt": cond.value }),
        Operator::GreaterThanEqual => json!({ "$gte": cond.value }),
        Operator::LesserThan => json!({ "$lt": cond.value }),
        Operator::LesserThanEqual => json!({ "$lte": cond.value }),
        Operator::Like => json!({ "$regex": like_to_regex(&cond.value) }),
        Operator::NotLike => json!({ "$not": { "$regex": like_to_regex(&cond.value) } }),
        Operator::In | Operator::NotIn => {
            if !cond.value.is_array() {
                tracing::warn!(
                    field = %cond.field,
                    operator = %cond.operator,
                    value = %cond.value,
                    "Skipping condition: value is not a sequence"
                );
                return None;
            }
            let key = if cond.operator == Operator::In { "$in" } else { "$nin" };
            json!({ key: cond.value })
        }
        Operator::IsNull => json!({ "$exists": false }),
        Operator::IsNotNull => json!({ "$exists": true }),
    };

    let mut doc = Map::new();
    doc.insert(cond.field.clone(), clause);
    Some(doc)
}

/// Translate a LIKE pattern (`%` any run, `_` any single character) into an
/// anchored regular expression.
fn like_to_regex(pattern: &Value) -> String {
    let pattern = value_token(pattern);
    let mut out = String::with_capacity(pattern.len() + 2);
    let mut literal = String::new();
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if ch == '%' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

/// Join non-empty documents under `joiner`.
pub(super) fn join(children: Vec<Map<String, Value>>, joiner: Joiner) -> Map<String, Value> {
    let mut children: Vec<_> = children.into_iter().filter(|c| !c.is_empty()).collect();
    match children.len() {
        0 => Map::new(),
        1 => children.remove(0),
        _ => wrap(joiner, children.into_iter().map(Value::Object).collect()),
    }
}

/// Concatenate documents under their leading joiners (`$and` when absent),
/// reading the chain the way the relational text reads: AND binds tighter
/// than OR, so `add(or(A, B), and(C))` is `A OR (B AND C)`.
///
/// Each document is split into OR-terms of AND-ed operands; an AND-joined
/// document merges its first term into the running last term, an OR-joined
/// one appends its terms.
pub(super) fn concat(children: Vec<(Option<Joiner>, Map<String, Value>)>) -> Map<String, Value> {
    let mut children = children.into_iter().filter(|(_, doc)| !doc.is_empty());
    let Some((_, first)) = children.next() else {
        return Map::new();
    };

    let mut terms = or_terms(first);
    for (leading, doc) in children {
        let mut incoming = or_terms(doc).into_iter();
        if leading.unwrap_or(Joiner::And) == Joiner::And {
            if let (Some(last), Some(head)) = (terms.last_mut(), incoming.next()) {
                last.extend(head);
            }
        }
        terms.extend(incoming);
    }
    from_terms(terms)
}

/// `{$or: [t1, t2]}` into its terms, `{$and: [..]}` into a single term of
/// its operands, anything else into a single one-operand term.
fn or_terms(mut doc: Map<String, Value>) -> Vec<Vec<Value>> {
    if let Some(operands) = operand_list(&mut doc, Joiner::Or) {
        return std::mem::take(operands)
            .into_iter()
            .map(|operand| match operand {
                Value::Object(term) => and_operands(term),
                other => vec![other],
            })
            .collect();
    }
    vec![and_operands(doc)]
}

fn and_operands(mut doc: Map<String, Value>) -> Vec<Value> {
    if let Some(operands) = operand_list(&mut doc, Joiner::And) {
        return std::mem::take(operands);
    }
    vec![Value::Object(doc)]
}

fn from_terms(terms: Vec<Vec<Value>>) -> Map<String, Value> {
    let mut products: Vec<Value> = terms
        .into_iter()
        .map(|mut operands| match operands.len() {
            1 => operands.remove(0),
            _ => Value::Object(wrap(Joiner::And, operands)),
        })
        .collect();
    match products.len() {
        1 => match products.remove(0) {
            Value::Object(doc) => doc,
            other => wrap(Joiner::And, vec![other]),
        },
        _ => wrap(Joiner::Or, products),
    }
}

/// The operand array when `doc` is exactly `{joiner_key: [...]}`.
fn operand_list(doc: &mut Map<String, Value>, joiner: Joiner) -> Option<&mut Vec<Value>> {
    if doc.len() != 1 {
        return None;
    }
    doc.get_mut(joiner.document_key()).and_then(Value::as_array_mut)
}

fn wrap(joiner: Joiner, operands: Vec<Value>) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert(joiner.document_key().to_string(), Value::Array(operands));
    doc
}
