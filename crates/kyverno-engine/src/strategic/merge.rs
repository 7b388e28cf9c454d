//! 2-way strategic merge over generic JSON trees
//!
//! Follows the Kubernetes strategic merge rules that apply without a schema:
//! lists of objects are merged element-wise by a merge key configured per
//! field name, every other list is replaced.

use serde_json::{Map, Value};

use super::PreprocessError;
use crate::config::StrategicMergeConfig;

const DIRECTIVE: &str = "$patch";

/// Merge `patch` into `original`
///
/// - maps merge recursively; a `null` value deletes the key
/// - `$patch: replace` inside a map replaces the map outright
/// - `$patch: delete` removes the map, or the matching list element
/// - object lists merge by merge key; unmatched patch elements are appended
///
/// A patch object without the merge key is rejected when the original list
/// is fully keyed.
pub fn merge(
    original: &Value,
    patch: &Value,
    config: &StrategicMergeConfig,
) -> Result<Value, PreprocessError> {
    merge_value(original, patch, None, config)
}

fn merge_value(
    original: &Value,
    patch: &Value,
    field: Option<&str>,
    config: &StrategicMergeConfig,
) -> Result<Value, PreprocessError> {
    match (original, patch) {
        (Value::Object(orig), Value::Object(p)) => merge_maps(orig, p, config),
        (Value::Array(orig), Value::Array(p)) => merge_lists(orig, p, field, config),
        (_, p) => Ok(strip_directives(p)),
    }
}

fn merge_maps(
    original: &Map<String, Value>,
    patch: &Map<String, Value>,
    config: &StrategicMergeConfig,
) -> Result<Value, PreprocessError> {
    if directive(patch) == Some("replace") {
        return Ok(strip_directives(&Value::Object(patch.clone())));
    }

    let mut out = original.clone();
    for (key, value) in patch {
        if key == DIRECTIVE {
            continue;
        }
        if value.is_null() || is_delete(value) {
            out.remove(key);
            continue;
        }
        let merged = match original.get(key) {
            Some(existing) => merge_value(existing, value, Some(key), config)?,
            None => strip_directives(value),
        };
        out.insert(key.clone(), merged);
    }
    Ok(Value::Object(out))
}

fn merge_lists(
    original: &[Value],
    patch: &[Value],
    field: Option<&str>,
    config: &StrategicMergeConfig,
) -> Result<Value, PreprocessError> {
    let replace_all = patch
        .iter()
        .any(|p| p.as_object().is_some_and(|m| m.len() == 1 && directive(m) == Some("replace")));
    let patch: Vec<&Value> = patch
        .iter()
        .filter(|p| !p.as_object().is_some_and(|m| m.len() == 1 && m.contains_key(DIRECTIVE)))
        .collect();

    let key = config.merge_key_for(field);
    let keyed = |v: &Value| v.as_object().is_some_and(|m| m.contains_key(key));
    let original_keyed = !original.is_empty() && original.iter().all(keyed);

    if !replace_all && original_keyed {
        if let Some(missing) = patch.iter().find(|p| p.is_object() && !keyed(p)) {
            return Err(PreprocessError::MissingMergeKey {
                field: field.unwrap_or_default().to_string(),
                key: key.to_string(),
                element: missing.to_string(),
            });
        }
    }

    if replace_all
        || patch.is_empty()
        || !patch.iter().all(|p| keyed(p))
        || !original.iter().all(keyed)
    {
        return Ok(Value::Array(
            patch
                .into_iter()
                .filter(|p| !is_delete(p))
                .map(strip_directives)
                .collect(),
        ));
    }

    let mut out = original.to_vec();
    for item in patch {
        let position = out.iter().position(|o| o.get(key) == item.get(key));
        match (position, is_delete(item)) {
            (Some(idx), true) => {
                out.remove(idx);
            }
            (None, true) => {}
            (Some(idx), false) => out[idx] = merge_value(&out[idx], item, None, config)?,
            (None, false) => out.push(strip_directives(item)),
        }
    }
    Ok(Value::Array(out))
}

fn directive(map: &Map<String, Value>) -> Option<&str> {
    map.get(DIRECTIVE).and_then(Value::as_str)
}

fn is_delete(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| directive(m) == Some("delete"))
}

/// Drop directives and nulls from a subtree that is inserted as-is
fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, v)| k.as_str() != DIRECTIVE && !v.is_null())
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|v| !is_delete(v))
                .map(strip_directives)
                .collect(),
        ),
        other => other.clone(),
    }
}
