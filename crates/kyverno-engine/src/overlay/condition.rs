//! Conditional anchor gate for overlays
//!
//! Before an overlay produces any patch, every `(key)` anchor in it is checked
//! against the resource. A missing key is reported as
//! [`OverlayError::ConditionNotPresent`], a key whose value does not match as
//! [`OverlayError::ConditionFailure`]. Either one means the rule is skipped.

use serde_json::{Map, Value};

use super::OverlayError;
use crate::anchor::{value_type_name, AnchorKind, Pattern};
use crate::matcher;
use crate::patch::pointer_from_tokens;

/// Check all conditional anchors of `overlay` against `resource`
pub fn meet_conditions(resource: &Value, overlay: &Pattern) -> Result<(), OverlayError> {
    let mut path = Vec::new();
    meet_conditions_at(resource, overlay, &mut path)
}

/// Same as [`meet_conditions`], reporting paths relative to `path`
pub(crate) fn meet_conditions_at(
    resource: &Value,
    overlay: &Pattern,
    path: &mut Vec<String>,
) -> Result<(), OverlayError> {
    match overlay {
        Pattern::Object(entries) => match resource.as_object() {
            Some(map) => check_map(map, entries, path),
            None if overlay.has_conditions() => Err(different_types(path)),
            None => Ok(()),
        },
        Pattern::Array(items) => match resource.as_array() {
            Some(values) => check_array(values, items, path),
            None if overlay.has_conditions() => Err(different_types(path)),
            None => Ok(()),
        },
        Pattern::Scalar(_) => Ok(()),
    }
}

fn check_map(
    map: &Map<String, Value>,
    entries: &[(crate::anchor::AnchorKey, Pattern)],
    path: &mut Vec<String>,
) -> Result<(), OverlayError> {
    for (key, pattern) in entries.iter().filter(|(k, _)| k.is_conditional()) {
        path.push(key.key().to_string());
        let result = match map.get(key.key()) {
            None => Err(OverlayError::ConditionNotPresent {
                path: pointer_from_tokens(path.iter()),
                message: format!("resource field is not present {}", key.key()),
            }),
            Some(value) if !matcher::matches(value, pattern) => {
                Err(OverlayError::ConditionFailure {
                    path: pointer_from_tokens(path.iter()),
                    message: format!(
                        "failed validating value {} with overlay {}",
                        value,
                        pattern.to_value()
                    ),
                })
            }
            Some(_) => Ok(()),
        };
        path.pop();
        result?;
    }

    for (key, pattern) in entries.iter().filter(|(k, _)| k.kind() == AnchorKind::None) {
        path.push(key.key().to_string());
        let result = match map.get(key.key()) {
            Some(value) => meet_conditions_at(value, pattern, path),
            None if pattern.has_conditions() => Err(OverlayError::ConditionNotPresent {
                path: pointer_from_tokens(path.iter()),
                message: format!("resource field is not present {}", key.key()),
            }),
            None => Ok(()),
        };
        path.pop();
        result?;
    }

    Ok(())
}

fn check_array(
    values: &[Value],
    items: &[Pattern],
    path: &mut Vec<String>,
) -> Result<(), OverlayError> {
    let conditional: Vec<&Pattern> = items.iter().filter(|i| i.has_conditions()).collect();
    if conditional.is_empty() {
        return Ok(());
    }

    let Some(first) = values.first() else {
        return Err(OverlayError::ConditionNotPresent {
            path: pointer_from_tokens(path.iter()),
            message: "resource array is empty".to_string(),
        });
    };

    if items[0].type_name() != value_type_name(first) {
        return Err(different_types(path));
    }

    for item in conditional {
        let mut last_error = None;
        for (idx, value) in values.iter().enumerate() {
            path.push(idx.to_string());
            let result = meet_conditions_at(value, item, path);
            path.pop();
            match result {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        if let Some(e) = last_error {
            return Err(e);
        }
    }

    Ok(())
}

fn different_types(path: &[String]) -> OverlayError {
    let path = pointer_from_tokens(path.iter());
    OverlayError::ConditionFailure {
        message: format!("found anchor on different types of element at path {path}"),
        path,
    }
}
