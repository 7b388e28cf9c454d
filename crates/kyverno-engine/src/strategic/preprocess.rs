//! Anchor resolution for strategic merge patches
//!
//! A strategic merge patch may carry the same anchors as an overlay. The
//! merge itself knows nothing about them, so the pattern is first resolved
//! against the resource into a plain patch:
//!
//! - `(key)` conditions are matched and then removed
//! - `+(key)` entries are removed where the resource has the key, and
//!   unwrapped otherwise
//! - anchored list elements are expanded into one named element per
//!   matching resource element

use serde_json::{Map, Value};
use tracing::trace;

use super::PreprocessError;
use crate::anchor::{AnchorKey, AnchorKind, Pattern};
use crate::matcher;
use crate::patch::pointer_from_tokens;

const NAME_KEY: &str = "name";

/// Resolve every anchor in `pattern` against `resource`
///
/// Returns [`PreprocessError::Condition`] when a condition outside any object
/// list is unmet; the rule does not apply to this resource.
pub fn preprocess(pattern: &Pattern, resource: &Value) -> Result<Value, PreprocessError> {
    let mut path = Vec::new();
    let resolved = process(pattern, Some(resource), &mut path)?;
    Ok(resolved.unwrap_or_else(|| Value::Object(Map::new())))
}

/// `None` means the field must be removed from the patch
fn process(
    pattern: &Pattern,
    resource: Option<&Value>,
    path: &mut Vec<String>,
) -> Result<Option<Value>, PreprocessError> {
    match pattern {
        Pattern::Object(entries) => process_map(entries, resource, path).map(Some),
        Pattern::Array(items) => {
            let values = resource.and_then(Value::as_array).map(Vec::as_slice);
            match items.first() {
                None => Ok(Some(Value::Array(Vec::new()))),
                Some(Pattern::Object(_)) => process_object_list(items, values, path),
                Some(_) => Ok(Some(process_scalar_list(items, values))),
            }
        }
        Pattern::Scalar(v) => Ok(Some(v.value().clone())),
    }
}

fn process_map(
    entries: &[(AnchorKey, Pattern)],
    resource: Option<&Value>,
    path: &mut Vec<String>,
) -> Result<Value, PreprocessError> {
    let map = resource.and_then(Value::as_object);

    for (key, condition) in entries.iter().filter(|(k, _)| k.is_conditional()) {
        path.push(key.key().to_string());
        let result = match map.and_then(|m| m.get(key.key())) {
            None => Err(PreprocessError::condition(
                path,
                format!("resource field is not present {}", key.key()),
            )),
            Some(value) if !matcher::matches(value, condition) => Err(PreprocessError::condition(
                path,
                format!(
                    "failed validating value {} with pattern {}",
                    value,
                    condition.to_value()
                ),
            )),
            Some(_) => Ok(()),
        };
        path.pop();
        result?;
    }

    let mut out = Map::new();
    for (key, value) in entries {
        match key.kind() {
            AnchorKind::Conditional => {}
            AnchorKind::AddIfAbsent => {
                if map.is_some_and(|m| m.contains_key(key.key())) {
                    trace!(key = key.key(), "resource has key, add-if-absent removed");
                } else {
                    out.insert(key.key().to_string(), value.strip_anchors());
                }
            }
            AnchorKind::None => {
                path.push(key.key().to_string());
                let child = map.and_then(|m| m.get(key.key()));
                let resolved = process(value, child, path);
                path.pop();
                if let Some(v) = resolved? {
                    out.insert(key.key().to_string(), v);
                }
            }
        }
    }
    Ok(Value::Object(out))
}

/// Resource-only scalars are carried over so the merge does not drop them
fn process_scalar_list(items: &[Pattern], resource: Option<&[Value]>) -> Value {
    let mut out: Vec<Value> = items.iter().map(Pattern::strip_anchors).collect();
    for value in resource.unwrap_or_default() {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    Value::Array(out)
}

fn process_object_list(
    items: &[Pattern],
    resource: Option<&[Value]>,
    path: &mut Vec<String>,
) -> Result<Option<Value>, PreprocessError> {
    let resource = resource.unwrap_or_default();
    let mut out = Vec::new();

    for item in items {
        if !item.has_anchors() {
            let counterpart = item_name(item).and_then(|name| {
                resource
                    .iter()
                    .find(|r| r.get(NAME_KEY).and_then(Value::as_str) == Some(name))
            });
            if let Some(v) = process(item, counterpart, path)? {
                out.push(v);
            }
            continue;
        }

        for (idx, element) in resource.iter().enumerate() {
            let Some(name) = element
                .get(NAME_KEY)
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
            else {
                continue;
            };

            path.push(idx.to_string());
            let resolved = process(item, Some(element), path);
            path.pop();

            match resolved {
                Ok(Some(Value::Object(mut synthesized))) => {
                    synthesized.insert(NAME_KEY.to_string(), Value::String(name.to_string()));
                    out.push(Value::Object(synthesized));
                }
                Ok(_) => {}
                Err(PreprocessError::Condition { path, message }) => {
                    trace!(%path, %message, "list element excluded");
                }
                Err(e) => return Err(e),
            }
        }
    }

    if out.is_empty() {
        trace!(path = %pointer_from_tokens(path.iter()), "list resolved to nothing, removed");
        return Ok(None);
    }
    Ok(Some(Value::Array(out)))
}

fn item_name(item: &Pattern) -> Option<&str> {
    match item.get(NAME_KEY) {
        Some((_, Pattern::Scalar(name))) => name.value().as_str(),
        _ => None,
    }
}
