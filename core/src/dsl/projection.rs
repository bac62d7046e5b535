//! Result projections
//!
//! A projection reshapes an activity result into the fields a workflow wants
//! to keep. Each field of the projection spec is either a literal (templates
//! resolved) or a single-operator node:
//!
//! - `{"$element": {"from", "where", "field"?, "else"?}}` picks the first
//!   matching element of an array
//! - `{"$eval": "path"}` reads a value from the projection scope
//!
//! The scope holds the activity params plus the raw result under `#`.

use serde_json::{Map, Value as JsonValue};

use super::conditions::match_condition;
use super::vars::{get_path, Vars};
use crate::errors::WorkflowError;

/// Scope key under which the raw activity result is visible
pub const RESULT_KEY: &str = "#";

/// Key of `$element.where` that matches against the whole element
const WHOLE_ELEMENT: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOp {
    Element,
    Eval,
}

impl ProjectionOp {
    pub const ALL: [ProjectionOp; 2] = [ProjectionOp::Element, ProjectionOp::Eval];

    pub fn key(self) -> &'static str {
        match self {
            ProjectionOp::Element => "$element",
            ProjectionOp::Eval => "$eval",
        }
    }

    pub fn from_key(key: &str) -> Option<ProjectionOp> {
        ProjectionOp::ALL.into_iter().find(|op| op.key() == key)
    }
}

/// Build the projected object. `result` is never modified.
pub fn make_projection(
    spec: &Map<String, JsonValue>,
    params: &Map<String, JsonValue>,
    result: &JsonValue,
) -> Result<Map<String, JsonValue>, WorkflowError> {
    let mut scope = params.clone();
    scope.insert(RESULT_KEY.to_string(), result.clone());
    let scope = Vars::from_map(scope);

    let mut out = Map::new();
    for (field, node) in spec {
        let resolved = scope.resolve_params(node);
        let value = project_node(&scope, resolved).map_err(|e| match e {
            WorkflowError::InvalidProjection { message } => WorkflowError::InvalidProjection {
                message: format!("field '{}': {}", field, message),
            },
            other => other,
        })?;
        out.insert(field.clone(), value);
    }
    Ok(out)
}

fn project_node(scope: &Vars, node: JsonValue) -> Result<JsonValue, WorkflowError> {
    let JsonValue::Object(map) = &node else {
        return Ok(node);
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(node);
    }
    if map.len() > 1 {
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        return Err(WorkflowError::InvalidProjection {
            message: format!("expected a single operator, found keys [{}]", keys.join(", ")),
        });
    }

    let Some((key, operand)) = map.iter().next() else {
        return Ok(node);
    };
    let op = ProjectionOp::from_key(key).ok_or_else(|| WorkflowError::UnknownProjection {
        operator: key.clone(),
    })?;

    match op {
        ProjectionOp::Element => element(scope, operand),
        ProjectionOp::Eval => Ok(eval(scope, operand)),
    }
}

/* ===================== Operators ===================== */

fn element(scope: &Vars, operand: &JsonValue) -> Result<JsonValue, WorkflowError> {
    let args = operand
        .as_object()
        .ok_or_else(|| WorkflowError::InvalidProjection {
            message: format!("$element expects an object, got {}", operand),
        })?;

    let items = match args.get("from") {
        Some(JsonValue::Array(items)) => Some(items),
        Some(JsonValue::String(path)) => scope.get(path.trim()).and_then(JsonValue::as_array),
        _ => None,
    };
    let fallback = args.get("else").cloned().unwrap_or(JsonValue::Null);
    let Some(items) = items else {
        return Ok(fallback);
    };

    let empty = Map::new();
    let criteria = match args.get("where") {
        Some(JsonValue::Object(criteria)) => criteria,
        None | Some(JsonValue::Null) => &empty,
        Some(other) => {
            return Err(WorkflowError::InvalidProjection {
                message: format!("$element.where must be an object, got {}", other),
            })
        }
    };

    for item in items {
        if element_matches(item, criteria)? {
            let picked = match args.get("field").and_then(JsonValue::as_str) {
                Some(field) => get_path(item, field).cloned().unwrap_or(JsonValue::Null),
                None => item.clone(),
            };
            return Ok(picked);
        }
    }
    Ok(fallback)
}

fn element_matches(item: &JsonValue, criteria: &Map<String, JsonValue>) -> Result<bool, WorkflowError> {
    for (key, condition) in criteria {
        let target = if key == WHOLE_ELEMENT {
            Some(item)
        } else {
            get_path(item, key)
        };

        // A bare literal is shorthand for `$eq`
        let matched = if condition.is_object() {
            match_condition(target, condition)?
        } else {
            let mut eq = Map::new();
            eq.insert("$eq".to_string(), condition.clone());
            match_condition(target, &JsonValue::Object(eq))?
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval(scope: &Vars, operand: &JsonValue) -> JsonValue {
    match operand {
        JsonValue::String(path) => scope.get(path.trim()).cloned().unwrap_or(JsonValue::Null),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(spec: JsonValue, params: JsonValue, result: JsonValue) -> Result<JsonValue, WorkflowError> {
        make_projection(
            spec.as_object().unwrap(),
            params.as_object().unwrap(),
            &result,
        )
        .map(JsonValue::Object)
    }

    #[test]
    fn test_element_picks_field_of_first_match() {
        let out = project(
            json!({
                "name": { "$element": {
                    "from": [{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }],
                    "where": { "id": { "$eq": 2 } },
                    "field": "name"
                } }
            }),
            json!({}),
            json!(null),
        )
        .unwrap();

        assert_eq!(out, json!({ "name": "b" }));
    }

    #[test]
    fn test_element_else_when_nothing_matches() {
        let out = project(
            json!({
                "name": { "$element": {
                    "from": [{ "id": 1, "name": "a" }],
                    "where": { "id": { "$eq": 2 } },
                    "field": "name",
                    "else": "none"
                } }
            }),
            json!({}),
            json!(null),
        )
        .unwrap();

        assert_eq!(out, json!({ "name": "none" }));
    }

    #[test]
    fn test_element_from_result_path_and_whole_element() {
        let result = json!({ "choices": ["draft", "final", "archived"] });
        let out = project(
            json!({
                "pick": { "$element": { "from": "${#.choices}", "where": { "_": { "$startsWith": "fin" } } } },
                "byPath": { "$element": { "from": "#.choices", "where": { "_": "archived" } } }
            }),
            json!({}),
            result.clone(),
        )
        .unwrap();

        assert_eq!(out, json!({ "pick": "final", "byPath": "archived" }));
        assert_eq!(result, json!({ "choices": ["draft", "final", "archived"] }));
    }

    #[test]
    fn test_eval_reads_scope() {
        let out = project(
            json!({
                "summary": { "$eval": "#.text" },
                "lang": { "$eval": "lang" },
                "missing": { "$eval": "#.nothing" },
                "literal": { "$eval": 42 }
            }),
            json!({ "lang": "en" }),
            json!({ "text": "short" }),
        )
        .unwrap();

        assert_eq!(
            out,
            json!({ "summary": "short", "lang": "en", "missing": null, "literal": 42 })
        );
    }

    #[test]
    fn test_literals_and_templates_pass_through() {
        let out = project(
            json!({ "label": "${lang}-${#.id}", "fixed": { "a": 1 }, "n": 3 }),
            json!({ "lang": "en" }),
            json!({ "id": 7, "extra": true }),
        )
        .unwrap();

        assert_eq!(out, json!({ "label": "en-7", "fixed": { "a": 1 }, "n": 3 }));
    }

    #[test]
    fn test_multiple_operator_keys_are_rejected() {
        let err = project(
            json!({ "x": { "$eval": "#", "other": 1 } }),
            json!({}),
            json!(1),
        )
        .unwrap_err();

        assert_eq!(err.code(), crate::errors::INVALID_PROJECTION);
        assert!(err.to_string().contains("field 'x'"));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = project(json!({ "x": { "$sum": [1, 2] } }), json!({}), json!(1)).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownProjection { ref operator } if operator == "$sum"));
    }
}
