//! Overlay patch generation
//!
//! An overlay is a partial resource whose keys may carry anchors. Applying it
//! walks the overlay and the resource side by side and emits the JSON Patch
//! operations that make the resource look like the overlay. The walk only
//! starts once [`condition::meet_conditions`] has accepted the whole tree.

pub mod condition;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::anchor::{value_type_name, AnchorKey, Pattern};
use crate::error::Error;
use crate::patch::{is_label_or_annotation_path, pointer_from_tokens, RawOp};

pub use condition::meet_conditions;

/// Errors raised while applying an overlay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// A conditional key is missing from the resource
    #[error("policy not applied, condition tag not present: {message} at {path}")]
    ConditionNotPresent {
        /// Pointer to the missing field
        path: String,
        /// Detail
        message: String,
    },

    /// A conditional key is present but its value does not match
    #[error("policy not applied, conditions are not met at {path}: {message}")]
    ConditionFailure {
        /// Pointer to the mismatching field
        path: String,
        /// Detail
        message: String,
    },

    /// Overlay and resource array elements have different types
    #[error("{0}")]
    TypeConflict(String),

    /// Any other failure while building patches
    #[error("{0}")]
    Failure(String),
}

impl OverlayError {
    /// True for the two condition outcomes, which skip the rule
    pub fn is_condition(&self) -> bool {
        matches!(
            self,
            OverlayError::ConditionNotPresent { .. } | OverlayError::ConditionFailure { .. }
        )
    }
}

impl From<OverlayError> for Error {
    fn from(err: OverlayError) -> Self {
        match err {
            OverlayError::ConditionNotPresent { .. } | OverlayError::ConditionFailure { .. } => {
                Error::ConditionNotMet(err.to_string())
            }
            OverlayError::TypeConflict(msg) => Error::OverlayTypeConflict(msg),
            OverlayError::Failure(msg) => Error::Overlay(msg),
        }
    }
}

/// Compute the JSON Patch that overlays `overlay` onto `resource`
///
/// Fails with a condition error when any conditional anchor is unmet, in which
/// case no operations are produced at all.
pub fn apply(resource: &Value, overlay: &Pattern) -> Result<Vec<RawOp>, OverlayError> {
    meet_conditions(resource, overlay)?;

    let mut ops = Vec::new();
    let mut path = Vec::new();
    apply_overlay(resource, overlay, &mut path, &mut ops)?;

    debug!(patches = ops.len(), "overlay applied");
    Ok(ops)
}

fn apply_overlay(
    resource: &Value,
    overlay: &Pattern,
    path: &mut Vec<String>,
    ops: &mut Vec<RawOp>,
) -> Result<(), OverlayError> {
    if overlay.type_name() != value_type_name(resource) {
        ops.push(replace_subtree(overlay, path)?);
        return Ok(());
    }

    match (overlay, resource) {
        (Pattern::Object(entries), Value::Object(map)) => {
            apply_to_map(map, entries, path, ops)
        }
        (Pattern::Array(items), Value::Array(values)) => {
            apply_to_array(values, items, overlay, path, ops)
        }
        _ => {
            ops.push(replace_subtree(overlay, path)?);
            Ok(())
        }
    }
}

fn apply_to_map(
    resource: &serde_json::Map<String, Value>,
    entries: &[(AnchorKey, Pattern)],
    path: &mut Vec<String>,
    ops: &mut Vec<RawOp>,
) -> Result<(), OverlayError> {
    for (key, value) in entries {
        if key.is_conditional() {
            continue;
        }

        path.push(key.key().to_string());
        let result = match resource.get(key.key()) {
            Some(_) if key.is_add_if_absent() => {
                trace!(path = %pointer_from_tokens(path.iter()), "key present, add-if-absent dropped");
                Ok(())
            }
            Some(existing) => apply_overlay(existing, value, path, ops),
            None if value.has_only_anchors() => Ok(()),
            None => insert_subtree(value, path).map(|op| ops.push(op)),
        };
        path.pop();
        result?;
    }
    Ok(())
}

fn apply_to_array(
    resource: &[Value],
    items: &[Pattern],
    overlay: &Pattern,
    path: &mut Vec<String>,
    ops: &mut Vec<RawOp>,
) -> Result<(), OverlayError> {
    let Some(first_item) = items.first() else {
        return Err(OverlayError::Failure(format!(
            "empty array detected in the overlay at {}",
            pointer_from_tokens(path.iter())
        )));
    };

    let Some(first_value) = resource.first() else {
        ops.push(insert_subtree(overlay, path)?);
        return Ok(());
    };

    if first_item.type_name() != value_type_name(first_value) {
        return Err(OverlayError::TypeConflict(format!(
            "overlay array and resource array have elements of different types: {} and {} at {}",
            first_item.type_name(),
            value_type_name(first_value),
            pointer_from_tokens(path.iter())
        )));
    }

    match first_item {
        Pattern::Object(_) => apply_to_array_of_maps(resource, items, path, ops),
        _ => union_append(resource, items, path, ops),
    }
}

/// Append overlay scalars the resource does not already hold
fn union_append(
    resource: &[Value],
    items: &[Pattern],
    path: &mut Vec<String>,
    ops: &mut Vec<RawOp>,
) -> Result<(), OverlayError> {
    let mut appended: Vec<Value> = Vec::new();
    for item in items {
        let value = item.strip_anchors();
        if resource.contains(&value) || appended.contains(&value) {
            continue;
        }

        path.push((resource.len() + appended.len()).to_string());
        let result = insert_value(value.clone(), path);
        path.pop();
        ops.push(result?);
        appended.push(value);
    }
    Ok(())
}

fn apply_to_array_of_maps(
    resource: &[Value],
    items: &[Pattern],
    path: &mut Vec<String>,
    ops: &mut Vec<RawOp>,
) -> Result<(), OverlayError> {
    let mut next_index = resource.len();

    for item in items {
        if !item.has_anchors() {
            path.push(next_index.to_string());
            let result = insert_subtree(item, path);
            path.pop();
            ops.push(result?);
            next_index += 1;
            continue;
        }

        // Anchored elements, top-level or nested, apply to every element
        // that satisfies their conditions.
        for (idx, element) in resource.iter().enumerate() {
            path.push(idx.to_string());
            let result = match condition::meet_conditions_at(element, item, path) {
                Ok(()) => apply_overlay(element, item, path, ops),
                Err(e) => {
                    trace!(error = %e, "array element skipped");
                    Ok(())
                }
            };
            path.pop();
            result?;
        }
    }
    Ok(())
}

fn insert_subtree(overlay: &Pattern, path: &[String]) -> Result<RawOp, OverlayError> {
    insert_value(overlay.strip_anchors(), path)
}

fn insert_value(mut value: Value, path: &[String]) -> Result<RawOp, OverlayError> {
    stringify_label_bools(&mut value, &mut path.to_vec());
    finish(RawOp::add(pointer_from_tokens(path.iter()), value))
}

fn replace_subtree(overlay: &Pattern, path: &[String]) -> Result<RawOp, OverlayError> {
    if path.is_empty() {
        return Err(OverlayError::Failure(format!(
            "cannot replace the document root with {}",
            overlay.type_name()
        )));
    }

    let mut value = overlay.strip_anchors();
    stringify_label_bools(&mut value, &mut path.to_vec());
    finish(RawOp::replace(pointer_from_tokens(path.iter()), value))
}

fn finish(op: RawOp) -> Result<RawOp, OverlayError> {
    op.validated()
        .map_err(|e| OverlayError::Failure(e.to_string()))
}

/// Label and annotation values must be strings, at `path` or anywhere below it
fn stringify_label_bools(value: &mut Value, path: &mut Vec<String>) {
    if is_label_or_annotation_path(path) {
        stringify_bools(value);
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(key.clone());
                stringify_label_bools(child, path);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter_mut().enumerate() {
                path.push(i.to_string());
                stringify_label_bools(child, path);
                path.pop();
            }
        }
        _ => {}
    }
}

fn stringify_bools(value: &mut Value) {
    match value {
        Value::Bool(b) => *value = Value::String(b.to_string()),
        Value::Object(map) => map.values_mut().for_each(stringify_bools),
        Value::Array(items) => items.iter_mut().for_each(stringify_bools),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overlay(resource: &Value, overlay: Value) -> Result<Vec<RawOp>, OverlayError> {
        apply(resource, &Pattern::compile(&overlay))
    }

    fn patched(resource: &Value, ops: &[RawOp]) -> Value {
        let mut doc = resource.clone();
        let operations: Vec<_> = ops
            .iter()
            .map(|op| op.to_patch_operation().unwrap())
            .collect();
        json_patch::patch(&mut doc, &operations).unwrap();
        doc
    }

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "nginx", "labels": {"app": "web"}},
            "spec": {"containers": [
                {"name": "nginx", "image": "nginx:latest"},
                {"name": "redis", "image": "redis:6", "imagePullPolicy": "Never"}
            ]}
        })
    }

    // ==========================================================================
    // Story Tests: Maps
    // ==========================================================================

    #[test]
    fn test_absent_key_is_added() {
        let ops = overlay(&pod(), json!({"metadata": {"labels": {"tier": "frontend"}}})).unwrap();
        assert_eq!(ops, vec![RawOp::add("/metadata/labels/tier", json!("frontend"))]);
    }

    #[test]
    fn test_present_scalar_is_replaced() {
        let ops = overlay(&pod(), json!({"metadata": {"labels": {"app": "api"}}})).unwrap();
        assert_eq!(ops, vec![RawOp::replace("/metadata/labels/app", json!("api"))]);
    }

    #[test]
    fn test_type_mismatch_replaces_subtree() {
        let resource = json!({"spec": {"replicas": "two"}});
        let ops = overlay(&resource, json!({"spec": {"replicas": {"min": 2}}})).unwrap();
        assert_eq!(ops, vec![RawOp::replace("/spec/replicas", json!({"min": 2}))]);
    }

    #[test]
    fn test_add_if_absent_keeps_existing_value() {
        let resource = json!({"metadata": {"annotations": {"owner": "team-a"}}});
        let ops = overlay(&resource, json!({"metadata": {"annotations": {"+(owner)": "team-b"}}}))
            .unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_add_if_absent_adds_missing_value() {
        let resource = json!({"metadata": {"annotations": {}}});
        let ops = overlay(&resource, json!({"metadata": {"annotations": {"+(owner)": "team-b"}}}))
            .unwrap();
        assert_eq!(ops, vec![RawOp::add("/metadata/annotations/owner", json!("team-b"))]);
    }

    #[test]
    fn test_anchor_only_subtree_is_not_added() {
        let resource = json!({"metadata": {"name": "x"}});
        let ops = overlay(
            &resource,
            json!({"metadata": {"name": "x", "spec": {"(optional)": "*"}}}),
        );
        // the absent `spec` holds only a condition, which cannot be met
        assert!(ops.unwrap_err().is_condition());

        let ops = overlay(&resource, json!({"spec": {"extra": {}}})).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_add_if_absent_under_missing_parent_is_added() {
        let resource = json!({"metadata": {"name": "x"}});
        let ops = overlay(&resource, json!({"metadata": {"labels": {"+(team)": "platform"}}}))
            .unwrap();
        assert_eq!(ops, vec![RawOp::add("/metadata/labels", json!({"team": "platform"}))]);
    }

    #[test]
    fn test_bools_under_labels_become_strings() {
        let resource = json!({"metadata": {"name": "x"}});
        let ops = overlay(
            &resource,
            json!({"metadata": {"labels": {"injected": true}}, "spec": {"hostNetwork": true}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![
                RawOp::add("/metadata/labels", json!({"injected": "true"})),
                RawOp::add("/spec", json!({"hostNetwork": true})),
            ]
        );
    }

    #[test]
    fn test_bools_become_strings_when_metadata_is_absent() {
        let resource = json!({"kind": "Pod"});
        let ops = overlay(&resource, json!({"metadata": {"labels": {"injected": true}}})).unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add("/metadata", json!({"labels": {"injected": "true"}}))]
        );
        assert_eq!(patched(&resource, &ops)["metadata"]["labels"]["injected"], "true");
    }

    #[test]
    fn test_bools_become_strings_in_nested_template_metadata() {
        let resource = json!({"kind": "Deployment", "spec": {"replicas": 1}});
        let ops = overlay(
            &resource,
            json!({"spec": {"template": {
                "metadata": {"annotations": {"sidecar": false}},
                "spec": {"hostNetwork": true}
            }}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add(
                "/spec/template",
                json!({
                    "metadata": {"annotations": {"sidecar": "false"}},
                    "spec": {"hostNetwork": true}
                })
            )]
        );
    }

    #[test]
    fn test_label_keys_are_pointer_escaped() {
        let resource = json!({"metadata": {"labels": {}}});
        let ops = overlay(
            &resource,
            json!({"metadata": {"labels": {"app.kubernetes.io/name": "web"}}}),
        )
        .unwrap();
        assert_eq!(ops[0].path, "/metadata/labels/app.kubernetes.io~1name");
    }

    #[test]
    fn test_condition_failure_produces_no_ops() {
        let err = overlay(
            &pod(),
            json!({"metadata": {"(name)": "redis", "labels": {"x": "y"}}}),
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::ConditionFailure { .. }));
        assert!(matches!(Error::from(err), Error::ConditionNotMet(_)));
    }

    // ==========================================================================
    // Story Tests: Arrays
    // ==========================================================================

    #[test]
    fn test_conditional_element_applies_to_matching_containers() {
        let ops = overlay(
            &pod(),
            json!({"spec": {"containers": [{"(image)": "*:latest", "imagePullPolicy": "Always"}]}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add("/spec/containers/0/imagePullPolicy", json!("Always"))]
        );
    }

    #[test]
    fn test_add_if_absent_element_broadcasts() {
        let ops = overlay(
            &pod(),
            json!({"spec": {"containers": [{"+(imagePullPolicy)": "IfNotPresent"}]}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add("/spec/containers/0/imagePullPolicy", json!("IfNotPresent"))]
        );
    }

    #[test]
    fn test_nested_anchor_element_gates_per_index() {
        let resource = json!({"spec": {"containers": [
            {"name": "a", "securityContext": {"privileged": true}},
            {"name": "b", "securityContext": {"privileged": false}}
        ]}});
        let ops = overlay(
            &resource,
            json!({"spec": {"containers": [{"securityContext": {"(privileged)": true, "runAsNonRoot": true}}]}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add(
                "/spec/containers/0/securityContext/runAsNonRoot",
                json!(true)
            )]
        );
    }

    #[test]
    fn test_plain_element_is_appended() {
        let ops = overlay(
            &pod(),
            json!({"spec": {"containers": [{"name": "sidecar", "image": "envoy"}]}}),
        )
        .unwrap();
        assert_eq!(
            ops,
            vec![RawOp::add(
                "/spec/containers/2",
                json!({"name": "sidecar", "image": "envoy"})
            )]
        );
    }

    #[test]
    fn test_scalar_array_union_append() {
        let resource = json!({"spec": {"args": ["--verbose", "--port=80"]}});
        let ops = overlay(
            &resource,
            json!({"spec": {"args": ["--port=80", "--tls", "--tls"]}}),
        )
        .unwrap();
        assert_eq!(ops, vec![RawOp::add("/spec/args/2", json!("--tls"))]);
        assert_eq!(
            patched(&resource, &ops)["spec"]["args"],
            json!(["--verbose", "--port=80", "--tls"])
        );
    }

    #[test]
    fn test_empty_resource_array_takes_whole_overlay() {
        let resource = json!({"spec": {"args": []}});
        let ops = overlay(&resource, json!({"spec": {"args": ["a", "b"]}})).unwrap();
        assert_eq!(ops, vec![RawOp::add("/spec/args", json!(["a", "b"]))]);
    }

    #[test]
    fn test_empty_overlay_array_is_an_error() {
        let err = overlay(&pod(), json!({"spec": {"containers": []}})).unwrap_err();
        assert!(matches!(err, OverlayError::Failure(_)));
    }

    #[test]
    fn test_element_type_conflict() {
        let err = overlay(&pod(), json!({"spec": {"containers": ["nginx"]}})).unwrap_err();
        assert!(matches!(err, OverlayError::TypeConflict(_)));
        assert!(matches!(Error::from(err), Error::OverlayTypeConflict(_)));
    }

    // ==========================================================================
    // Story Tests: Idempotence
    // ==========================================================================

    #[test]
    fn test_second_application_changes_nothing() {
        let pattern = json!({
            "metadata": {"labels": {"+(team)": "platform", "managed": true}},
            "spec": {"containers": [{"(image)": "*:latest", "imagePullPolicy": "Always"}]}
        });
        let first = patched(&pod(), &overlay(&pod(), pattern.clone()).unwrap());
        let second = patched(&first, &overlay(&first, pattern).unwrap());
        assert_eq!(first, second);
        assert_eq!(first["metadata"]["labels"]["managed"], "true");
    }
}
