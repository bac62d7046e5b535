//! Workflow variable store
//!
//! `Vars` holds the bindings of one workflow run. Values are addressed with
//! dotted paths (`doc.properties.title`, `items.0.id`) and can be spliced into
//! parameters with `${path}` placeholders.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::OnceLock;

use super::conditions::match_condition;
use crate::errors::WorkflowError;
use crate::types::ImportSpec;

pub const OBJECT_IDS: &str = "objectIds";
pub const OBJECT_ID: &str = "objectId";

fn template_re() -> &'static Regex {
    static TEMPLATE_RE: OnceLock<Regex> = OnceLock::new();
    TEMPLATE_RE.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("valid template regex"))
}

/* ===================== Paths ===================== */

/// Descend into `root` along a dotted path
pub fn get_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(root, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` into `root` along a dotted path
pub fn set_path(root: &mut JsonValue, path: &str, value: JsonValue) {
    let segments: Vec<&str> = path.split('.').collect();
    set_in(root, &segments, value);
}

fn set_in(target: &mut JsonValue, segments: &[&str], value: JsonValue) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };

    if let JsonValue::Array(items) = target {
        if let Ok(idx) = head.parse::<usize>() {
            if idx >= items.len() {
                items.resize(idx + 1, JsonValue::Null);
            }
            set_in(&mut items[idx], rest, value);
            return;
        }
    }

    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(map) = target {
        let slot = map.entry(head.to_string()).or_insert(JsonValue::Null);
        set_in(slot, rest, value);
    }
}

/// String form used when a value is interpolated into text
pub fn to_display_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/* ===================== Vars ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    vars: Map<String, JsonValue>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(vars: Map<String, JsonValue>) -> Self {
        Self { vars }
    }

    /// Store for a new run: workflow defaults, overlaid by caller vars, plus the
    /// `objectIds` / `objectId` bindings
    pub fn for_run(
        defaults: &Map<String, JsonValue>,
        overrides: &Map<String, JsonValue>,
        object_ids: &[String],
    ) -> Self {
        let mut vars = defaults.clone();
        for (key, value) in overrides {
            vars.insert(key.clone(), value.clone());
        }

        let ids: Vec<JsonValue> = object_ids.iter().cloned().map(JsonValue::String).collect();
        match ids.first() {
            Some(first) => {
                vars.insert(OBJECT_ID.to_string(), first.clone());
            }
            None => {
                vars.remove(OBJECT_ID);
            }
        }
        vars.insert(OBJECT_IDS.to_string(), JsonValue::Array(ids));

        Self { vars }
    }

    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let root = self.vars.get(head)?;
        match rest {
            Some(rest) => get_path(root, rest),
            None => Some(root),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Write `value` at `path`, creating intermediate objects as needed
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest.split('.').collect::<Vec<_>>()),
            None => (path, Vec::new()),
        };
        let slot = self
            .vars
            .entry(head.to_string())
            .or_insert(JsonValue::Null);
        set_in(slot, &rest, value);
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.vars)
    }

    /* ===================== Templates ===================== */

    /// Substitute `${path}` placeholders throughout a value tree.
    ///
    /// A string made of exactly one placeholder becomes the variable's value
    /// with its type intact. Placeholders inside longer text are replaced by
    /// the value's string form. Unresolved placeholders stay verbatim.
    pub fn resolve_params(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => self.resolve_template(s),
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|v| self.resolve_params(v)).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(self.resolve_map(map)),
            other => other.clone(),
        }
    }

    pub fn resolve_map(&self, map: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.resolve_params(v)))
            .collect()
    }

    /// Interpolate placeholders in `text`, always producing a string
    pub fn resolve_string(&self, text: &str) -> String {
        template_re()
            .replace_all(text, |caps: &Captures| match self.get(caps[1].trim()) {
                Some(v) => to_display_string(v),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// `"${n}"` yields the value of `n` itself rather than its string form,
    /// unlike every other interpolation. Params and `$element.from` need
    /// arrays and objects to pass through a placeholder unchanged.
    fn resolve_template(&self, text: &str) -> JsonValue {
        if let Some(caps) = template_re().captures(text) {
            let whole = &caps[0];
            if whole.len() == text.len() {
                return match self.get(caps[1].trim()) {
                    Some(v) => v.clone(),
                    None => JsonValue::String(text.to_string()),
                };
            }
        }
        JsonValue::String(self.resolve_string(text))
    }

    /* ===================== Imports & Conditions ===================== */

    /// Fresh object holding only the imported variables
    pub fn import_vars(&self, imports: &ImportSpec) -> Map<String, JsonValue> {
        let mut out = Map::new();
        for (param, path, default) in imports.entries() {
            if let Some(value) = self.get(path).or(default) {
                out.insert(param.to_string(), value.clone());
            }
        }
        out
    }

    /// Evaluate a guard: every field must satisfy its operators
    pub fn matches(&self, condition: &Map<String, JsonValue>) -> Result<bool, WorkflowError> {
        for (path, operators) in condition {
            let operators = self.resolve_params(operators);
            if !match_condition(self.get(path), &operators)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
