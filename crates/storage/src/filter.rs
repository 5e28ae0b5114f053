//! Filter interpreter (spec.md §4.7/§4.10, C10).
//!
//! An object filter is a conjunction of per-field conditions unless it
//! uses `$and`/`$or`. A condition is either a scalar (equality) or an
//! operator map drawn from `{$eq, $ne, $gt, $gte, $lt, $lte, $in, $nin,
//! $regex, $exists}`. This module is standalone so `find`, `updateMany`,
//! `deleteMany`, and index-fast-path detection all share one semantics.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// A parsed filter, ready to test against documents.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Every sub-filter must match (implicit conjunction of fields, or
    /// an explicit `$and`).
    And(Vec<Filter>),
    /// At least one sub-filter must match (`$or`).
    Or(Vec<Filter>),
    /// A single field's condition.
    Field(String, Condition),
}

/// A per-field condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Scalar equality shorthand and `$eq`.
    Eq(Value),
    /// `$ne`.
    Ne(Value),
    /// `$gt`.
    Gt(Value),
    /// `$gte`.
    Gte(Value),
    /// `$lt`.
    Lt(Value),
    /// `$lte`.
    Lte(Value),
    /// `$in`.
    In(Vec<Value>),
    /// `$nin`.
    Nin(Vec<Value>),
    /// `$regex`, pre-compiled.
    Regex(Regex),
    /// `$exists`.
    Exists(bool),
}

/// Errors building a [`Filter`] from a raw JSON filter object.
#[derive(Debug, Error)]
pub enum FilterError {
    /// An invalid `$regex` pattern.
    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex {
        /// The offending pattern string.
        pattern: String,
        /// The underlying regex compiler error.
        reason: String,
    },
    /// A filter condition was shaped in a way none of the known
    /// operators or scalar-equality forms accept.
    #[error("invalid filter condition for field '{field}': {detail}")]
    InvalidCondition {
        /// The field the condition was attached to.
        field: String,
        /// What was wrong with it.
        detail: String,
    },
}

impl Filter {
    /// Parse a raw filter object (as accepted by `find`/`updateMany`/
    /// `deleteMany`) into a [`Filter`].
    pub fn parse(raw: &Value) -> Result<Filter, FilterError> {
        let obj = match raw.as_object() {
            Some(o) => o,
            None => {
                return Err(FilterError::InvalidCondition {
                    field: String::new(),
                    detail: "filter must be a JSON object".to_string(),
                })
            }
        };

        let mut clauses = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "$and" => {
                    let items = value.as_array().ok_or_else(|| FilterError::InvalidCondition {
                        field: "$and".to_string(),
                        detail: "must be an array of filters".to_string(),
                    })?;
                    let parsed: Result<Vec<_>, _> = items.iter().map(Filter::parse).collect();
                    clauses.push(Filter::And(parsed?));
                }
                "$or" => {
                    let items = value.as_array().ok_or_else(|| FilterError::InvalidCondition {
                        field: "$or".to_string(),
                        detail: "must be an array of filters".to_string(),
                    })?;
                    let parsed: Result<Vec<_>, _> = items.iter().map(Filter::parse).collect();
                    clauses.push(Filter::Or(parsed?));
                }
                field => {
                    clauses.push(Filter::Field(field.to_string(), Condition::parse(field, value)?));
                }
            }
        }
        Ok(Filter::And(clauses))
    }

    /// `true` if `doc` satisfies this filter.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Field(field, cond) => cond.matches(doc.get(field)),
        }
    }

    /// If this filter is exactly a single top-level scalar-equality
    /// condition on one field (no operator map, no `$and`/`$or`),
    /// return `(field, value)` so the caller can take the index
    /// fast-path (spec.md §4.7). Any other shape, including `$in`,
    /// returns `None` and forces a full scan.
    pub fn as_single_equality(&self) -> Option<(&str, &Value)> {
        match self {
            Filter::And(clauses) if clauses.len() == 1 => clauses[0].as_single_equality(),
            Filter::Field(field, Condition::Eq(value)) => Some((field.as_str(), value)),
            _ => None,
        }
    }
}

impl Condition {
    fn parse(field: &str, value: &Value) -> Result<Condition, FilterError> {
        if let Some(op_map) = value.as_object() {
            let is_operator_map = op_map.keys().any(|k| k.starts_with('$'));
            if is_operator_map {
                if op_map.len() != 1 {
                    return Err(FilterError::InvalidCondition {
                        field: field.to_string(),
                        detail: "operator map must contain exactly one operator".to_string(),
                    });
                }
                let (op, arg) = op_map.iter().next().unwrap();
                return Condition::from_operator(field, op, arg);
            }
        }
        Ok(Condition::Eq(value.clone()))
    }

    fn from_operator(field: &str, op: &str, arg: &Value) -> Result<Condition, FilterError> {
        match op {
            "$eq" => Ok(Condition::Eq(arg.clone())),
            "$ne" => Ok(Condition::Ne(arg.clone())),
            "$gt" => Ok(Condition::Gt(arg.clone())),
            "$gte" => Ok(Condition::Gte(arg.clone())),
            "$lt" => Ok(Condition::Lt(arg.clone())),
            "$lte" => Ok(Condition::Lte(arg.clone())),
            "$in" => {
                let items = arg.as_array().ok_or_else(|| FilterError::InvalidCondition {
                    field: field.to_string(),
                    detail: "$in requires an array".to_string(),
                })?;
                Ok(Condition::In(items.clone()))
            }
            "$nin" => {
                let items = arg.as_array().ok_or_else(|| FilterError::InvalidCondition {
                    field: field.to_string(),
                    detail: "$nin requires an array".to_string(),
                })?;
                Ok(Condition::Nin(items.clone()))
            }
            "$regex" => {
                let pattern = arg.as_str().ok_or_else(|| FilterError::InvalidCondition {
                    field: field.to_string(),
                    detail: "$regex requires a string pattern".to_string(),
                })?;
                let re = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Condition::Regex(re))
            }
            "$exists" => {
                let want = arg.as_bool().ok_or_else(|| FilterError::InvalidCondition {
                    field: field.to_string(),
                    detail: "$exists requires a boolean".to_string(),
                })?;
                Ok(Condition::Exists(want))
            }
            other => Err(FilterError::InvalidCondition {
                field: field.to_string(),
                detail: format!("unknown operator '{other}'"),
            }),
        }
    }

    fn matches(&self, field_value: Option<&Value>) -> bool {
        match self {
            Condition::Exists(want) => field_value.is_some() == *want,
            Condition::Eq(v) => field_value == Some(v),
            Condition::Ne(v) => field_value != Some(v),
            Condition::In(values) => field_value.map(|fv| values.iter().any(|v| v == fv)).unwrap_or(false),
            Condition::Nin(values) => field_value.map(|fv| !values.iter().any(|v| v == fv)).unwrap_or(true),
            Condition::Regex(re) => field_value.and_then(Value::as_str).map(|s| re.is_match(s)).unwrap_or(false),
            Condition::Gt(v) => compare(field_value, v).map(|o| o == Ordering::Greater).unwrap_or(false),
            Condition::Gte(v) => compare(field_value, v).map(|o| o != Ordering::Less).unwrap_or(false),
            Condition::Lt(v) => compare(field_value, v).map(|o| o == Ordering::Less).unwrap_or(false),
            Condition::Lte(v) => compare(field_value, v).map(|o| o != Ordering::Greater).unwrap_or(false),
        }
    }
}

/// Coercion-free scalar comparison: numbers compare numerically,
/// strings lexically; any other pairing (including a missing field)
/// is incomparable.
fn compare(field_value: Option<&Value>, other: &Value) -> Option<Ordering> {
    match (field_value?, other) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_equality_shorthand_matches() {
        let f = Filter::parse(&json!({"status": "active"})).unwrap();
        assert!(f.matches(&json!({"status": "active"})));
        assert!(!f.matches(&json!({"status": "inactive"})));
    }

    #[test]
    fn implicit_conjunction_requires_all_fields() {
        let f = Filter::parse(&json!({"status": "active", "age": {"$gte": 18}})).unwrap();
        assert!(f.matches(&json!({"status": "active", "age": 20})));
        assert!(!f.matches(&json!({"status": "active", "age": 10})));
    }

    #[test]
    fn or_combinator_matches_any_branch() {
        let f = Filter::parse(&json!({"$or": [{"status": "active"}, {"status": "pending"}]})).unwrap();
        assert!(f.matches(&json!({"status": "pending"})));
        assert!(!f.matches(&json!({"status": "closed"})));
    }

    #[test]
    fn missing_field_fails_equality_and_exists_true() {
        let f = Filter::parse(&json!({"nickname": {"$exists": true}})).unwrap();
        assert!(!f.matches(&json!({"name": "a"})));
        let f2 = Filter::parse(&json!({"nickname": {"$exists": false}})).unwrap();
        assert!(f2.matches(&json!({"name": "a"})));
    }

    #[test]
    fn in_and_nin_operators() {
        let f = Filter::parse(&json!({"tag": {"$in": ["a", "b"]}})).unwrap();
        assert!(f.matches(&json!({"tag": "a"})));
        assert!(!f.matches(&json!({"tag": "c"})));

        let f2 = Filter::parse(&json!({"tag": {"$nin": ["a", "b"]}})).unwrap();
        assert!(f2.matches(&json!({"tag": "c"})));
    }

    #[test]
    fn regex_matches_string_field() {
        let f = Filter::parse(&json!({"name": {"$regex": "^al"}})).unwrap();
        assert!(f.matches(&json!({"name": "alice"})));
        assert!(!f.matches(&json!({"name": "bob"})));
    }

    #[test]
    fn invalid_regex_pattern_is_rejected() {
        let err = Filter::parse(&json!({"name": {"$regex": "("}})).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRegex { .. }));
    }

    #[test]
    fn single_top_level_equality_is_detected_for_index_fast_path() {
        let f = Filter::parse(&json!({"email": "a@x.com"})).unwrap();
        let (field, value) = f.as_single_equality().unwrap();
        assert_eq!(field, "email");
        assert_eq!(value, &json!("a@x.com"));
    }

    #[test]
    fn in_operator_does_not_qualify_for_index_fast_path() {
        let f = Filter::parse(&json!({"email": {"$in": ["a@x.com"]}})).unwrap();
        assert!(f.as_single_equality().is_none());
    }

    #[test]
    fn multi_field_filter_does_not_qualify_for_index_fast_path() {
        let f = Filter::parse(&json!({"email": "a@x.com", "age": 20})).unwrap();
        assert!(f.as_single_equality().is_none());
    }

    #[test]
    fn numeric_comparison_operators() {
        let f = Filter::parse(&json!({"age": {"$gt": 18}})).unwrap();
        assert!(f.matches(&json!({"age": 19})));
        assert!(!f.matches(&json!({"age": 18})));
    }
}
