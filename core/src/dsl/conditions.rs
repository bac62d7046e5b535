//! Condition operators
//!
//! A condition is an object of operator keys (`$eq`, `$gt`, `$or`, ...)
//! applied to a single value. All operators of one condition must pass.
//! Unknown keys are rejected before anything is evaluated.

use regex::RegexBuilder;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;

use crate::errors::WorkflowError;

/* ===================== Operator Table ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    In,
    Nin,
    Gt,
    Lt,
    Gte,
    Lte,
    Exists,
    Null,
    Regexp,
    StartsWith,
    EndsWith,
    Contains,
    Or,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Eq,
        Operator::Ne,
        Operator::In,
        Operator::Nin,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Exists,
        Operator::Null,
        Operator::Regexp,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Contains,
        Operator::Or,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Gt => "$gt",
            Operator::Lt => "$lt",
            Operator::Gte => "$gte",
            Operator::Lte => "$lte",
            Operator::Exists => "$exists",
            Operator::Null => "$null",
            Operator::Regexp => "$regexp",
            Operator::StartsWith => "$startsWith",
            Operator::EndsWith => "$endsWith",
            Operator::Contains => "$contains",
            Operator::Or => "$or",
        }
    }

    pub fn from_key(key: &str) -> Option<Operator> {
        Operator::ALL.into_iter().find(|op| op.key() == key)
    }
}

/* ===================== Matching ===================== */

/// Evaluate `conditions` against `value` (`None` when the variable is absent)
pub fn match_condition(
    value: Option<&JsonValue>,
    conditions: &JsonValue,
) -> Result<bool, WorkflowError> {
    let operators = parse_operators(conditions)?;

    for (op, operand) in operators {
        if !apply(op, value, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn parse_operators(conditions: &JsonValue) -> Result<Vec<(Operator, &JsonValue)>, WorkflowError> {
    let map: &Map<String, JsonValue> =
        conditions
            .as_object()
            .ok_or_else(|| WorkflowError::InvalidCondition {
                message: format!("condition must be an object of operators, got {}", conditions),
            })?;

    map.iter()
        .map(|(key, operand)| {
            Operator::from_key(key)
                .map(|op| (op, operand))
                .ok_or_else(|| WorkflowError::UnknownCondition {
                    operator: key.clone(),
                })
        })
        .collect()
}

fn apply(op: Operator, value: Option<&JsonValue>, operand: &JsonValue) -> Result<bool, WorkflowError> {
    let matched = match op {
        Operator::Eq => value.is_some_and(|v| json_eq(v, operand)),
        Operator::Ne => !value.is_some_and(|v| json_eq(v, operand)),
        Operator::In => {
            let candidates = operand_array(op, operand)?;
            value.is_some_and(|v| candidates.iter().any(|c| json_eq(v, c)))
        }
        Operator::Nin => {
            let candidates = operand_array(op, operand)?;
            !value.is_some_and(|v| candidates.iter().any(|c| json_eq(v, c)))
        }
        Operator::Gt => compare(value, operand).is_some_and(|o| o == Ordering::Greater),
        Operator::Lt => compare(value, operand).is_some_and(|o| o == Ordering::Less),
        Operator::Gte => compare(value, operand).is_some_and(|o| o != Ordering::Less),
        Operator::Lte => compare(value, operand).is_some_and(|o| o != Ordering::Greater),
        Operator::Exists => value.is_some() == is_truthy(operand),
        Operator::Null => value.map_or(true, JsonValue::is_null) == is_truthy(operand),
        Operator::Regexp => match_regexp(value, operand)?,
        Operator::StartsWith => str_pair(value, operand).is_some_and(|(v, o)| v.starts_with(o)),
        Operator::EndsWith => str_pair(value, operand).is_some_and(|(v, o)| v.ends_with(o)),
        Operator::Contains => match value {
            Some(JsonValue::String(s)) => operand.as_str().is_some_and(|o| s.contains(o)),
            Some(JsonValue::Array(items)) => items.iter().any(|item| json_eq(item, operand)),
            _ => false,
        },
        Operator::Or => {
            let branches = operand_array(op, operand)?;
            let mut any = false;
            for branch in branches {
                if match_condition(value, branch)? {
                    any = true;
                    break;
                }
            }
            any
        }
    };
    Ok(matched)
}

fn operand_array(op: Operator, operand: &JsonValue) -> Result<&Vec<JsonValue>, WorkflowError> {
    operand
        .as_array()
        .ok_or_else(|| WorkflowError::InvalidCondition {
            message: format!("{} expects an array operand, got {}", op.key(), operand),
        })
}

fn str_pair<'a>(value: Option<&'a JsonValue>, operand: &'a JsonValue) -> Option<(&'a str, &'a str)> {
    Some((value?.as_str()?, operand.as_str()?))
}

/// Structural equality; numbers compare by value so `1` equals `1.0`
pub fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        (JsonValue::Array(xs), JsonValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (JsonValue::Object(xs), JsonValue::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering for numbers and strings; anything else is incomparable
fn compare(value: Option<&JsonValue>, operand: &JsonValue) -> Option<Ordering> {
    match (value?, operand) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn match_regexp(value: Option<&JsonValue>, operand: &JsonValue) -> Result<bool, WorkflowError> {
    let (pattern, flags) = match operand {
        JsonValue::String(p) => (p.as_str(), ""),
        JsonValue::Object(spec) => (
            spec.get("pattern").and_then(JsonValue::as_str).ok_or_else(|| {
                WorkflowError::InvalidCondition {
                    message: "$regexp object operand requires a 'pattern' string".to_string(),
                }
            })?,
            spec.get("flags").and_then(JsonValue::as_str).unwrap_or(""),
        ),
        other => {
            return Err(WorkflowError::InvalidCondition {
                message: format!("$regexp expects a pattern, got {}", other),
            })
        }
    };

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(WorkflowError::InvalidCondition {
                    message: format!("unsupported $regexp flag '{}'", other),
                })
            }
        };
    }
    let re = builder.build().map_err(|e| WorkflowError::InvalidCondition {
        message: format!("invalid $regexp pattern '{}': {}", pattern, e),
    })?;

    Ok(value
        .and_then(JsonValue::as_str)
        .is_some_and(|s| re.is_match(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(value: JsonValue, cond: JsonValue) -> bool {
        match_condition(Some(&value), &cond).unwrap()
    }

    #[test]
    fn test_range_is_and_across_operators() {
        assert!(check(json!(5), json!({ "$gt": 3, "$lt": 10 })));
        assert!(!check(json!(5), json!({ "$gt": 3, "$lt": 4 })));
        assert!(check(json!(5), json!({ "$gte": 5, "$lte": 5 })));
    }

    #[test]
    fn test_or_branches() {
        let cond = json!({ "$or": [{ "$eq": 1 }, { "$eq": 2 }] });
        assert!(check(json!(1), cond.clone()));
        assert!(check(json!(2), cond.clone()));
        assert!(!check(json!(3), cond.clone()));
        assert!(!check(json!(3), json!({ "$or": [] })));
    }

    #[test]
    fn test_unknown_operator_fails_even_when_other_ops_fail_first() {
        let err = match_condition(Some(&json!(1)), &json!({ "$unknownOp": 1 })).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownCondition { ref operator } if operator == "$unknownOp"));

        let err = match_condition(Some(&json!(1)), &json!({ "$eq": 2, "$zzz": 1 })).unwrap_err();
        assert_eq!(err.code(), crate::errors::UNKNOWN_CONDITION);
    }

    #[test]
    fn test_structural_equality() {
        assert!(check(json!({ "a": [1, 2] }), json!({ "$eq": { "a": [1, 2] } })));
        assert!(check(json!([1, 2]), json!({ "$ne": [2, 1] })));
        assert!(check(json!(1), json!({ "$eq": 1.0 })));
        assert!(!check(json!("1"), json!({ "$eq": 1 })));
    }

    #[test]
    fn test_membership() {
        assert!(check(json!("fr"), json!({ "$in": ["en", "fr"] })));
        assert!(check(json!("de"), json!({ "$nin": ["en", "fr"] })));
        assert!(match_condition(None, &json!({ "$nin": ["en"] })).unwrap());
        assert!(!match_condition(None, &json!({ "$in": ["en"] })).unwrap());

        let err = match_condition(Some(&json!(1)), &json!({ "$in": 1 })).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_CONDITION);
    }

    #[test]
    fn test_type_mismatch_comparison_is_non_match() {
        assert!(!check(json!("5"), json!({ "$gt": 3 })));
        assert!(!check(json!(null), json!({ "$lt": 3 })));
        assert!(!match_condition(None, &json!({ "$gte": 0 })).unwrap());
        assert!(check(json!("b"), json!({ "$gt": "a" })));
    }

    #[test]
    fn test_exists_and_null() {
        assert!(match_condition(None, &json!({ "$exists": false })).unwrap());
        assert!(check(json!(null), json!({ "$exists": true })));
        assert!(check(json!(null), json!({ "$null": true })));
        assert!(match_condition(None, &json!({ "$null": true })).unwrap());
        assert!(check(json!("Hello"), json!({ "$null": false })));
        assert!(!match_condition(None, &json!({ "$null": false })).unwrap());
    }

    #[test]
    fn test_string_operators() {
        assert!(check(json!("report.pdf"), json!({ "$endsWith": ".pdf" })));
        assert!(check(json!("report.pdf"), json!({ "$startsWith": "rep" })));
        assert!(check(json!("report.pdf"), json!({ "$contains": "port" })));
        assert!(check(json!(["a", "b"]), json!({ "$contains": "b" })));
        assert!(!check(json!(42), json!({ "$startsWith": "4" })));
    }

    #[test]
    fn test_regexp() {
        assert!(!check(json!("Invoice-2024"), json!({ "$regexp": "^invoice-\\d+$" })));
        assert!(check(
            json!("Invoice-2024"),
            json!({ "$regexp": { "pattern": "^invoice-\\d+$", "flags": "i" } })
        ));

        let err = match_condition(Some(&json!("x")), &json!({ "$regexp": "(" })).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_CONDITION);
    }

    #[test]
    fn test_non_object_condition_is_invalid() {
        let err = match_condition(Some(&json!(1)), &json!(1)).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_CONDITION);
    }
}
