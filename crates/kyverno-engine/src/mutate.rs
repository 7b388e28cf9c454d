//! Per-rule mutation dispatcher
//!
//! [`mutate`] picks the one strategy a rule carries, substitutes variables in
//! its payload, runs it, and folds the outcome into a [`RuleResponse`]. The
//! input resource is never modified; callers get a patched copy back.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::anchor::{value_type_name, Pattern};
use crate::config::EngineConfig;
use crate::diff;
use crate::error::Error;
use crate::json6902;
use crate::overlay;
use crate::patch::{join_patches, Operation, RawOp};
use crate::response::{RuleResponse, RuleStatus};
use crate::strategic;

// =============================================================================
// Rule payload
// =============================================================================

/// The `mutate` block of a policy rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Anchored partial resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Value>,
    /// Strategic merge patch, optionally anchored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_strategic_merge: Option<Value>,
    /// RFC6902 operations as JSON or YAML text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_json6902: Option<String>,
    /// Legacy list of RFC6902 operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<Value>>,
}

impl Mutation {
    /// The strategy to run, by priority: strategic merge, overlay, legacy
    /// patches, then JSON6902
    pub fn strategy(&self) -> Option<MutationSpec> {
        if let Some(patch) = &self.patch_strategic_merge {
            return Some(MutationSpec::StrategicMerge(patch.clone()));
        }
        if let Some(overlay) = &self.overlay {
            return Some(MutationSpec::Overlay(overlay.clone()));
        }
        if let Some(patches) = &self.patches {
            return Some(MutationSpec::Patches(patches.clone()));
        }
        self.patches_json6902.clone().map(MutationSpec::Json6902)
    }
}

/// A selected mutation strategy with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum MutationSpec {
    /// `patchStrategicMerge`
    StrategicMerge(Value),
    /// `overlay`
    Overlay(Value),
    /// `patches`
    Patches(Vec<Value>),
    /// `patchesJson6902`
    Json6902(String),
}

impl MutationSpec {
    fn kind(&self) -> &'static str {
        match self {
            MutationSpec::StrategicMerge(_) => "patchStrategicMerge",
            MutationSpec::Overlay(_) => "overlay",
            MutationSpec::Patches(_) => "patches",
            MutationSpec::Json6902(_) => "patchesJson6902",
        }
    }
}

// =============================================================================
// Variable substitution
// =============================================================================

/// Variable substitution failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SubstitutionError(pub String);

impl SubstitutionError {
    /// Create a substitution error with the given message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<SubstitutionError> for Error {
    fn from(err: SubstitutionError) -> Self {
        Error::Substitution(err.0)
    }
}

/// Resolves `{{...}}` variables in a rule payload
///
/// Implemented for any `Fn(Value) -> Result<Value, SubstitutionError>`.
#[cfg_attr(test, mockall::automock)]
pub trait VariableResolver {
    /// Return `value` with every variable replaced
    fn substitute(&self, value: Value) -> Result<Value, SubstitutionError>;
}

impl<F> VariableResolver for F
where
    F: Fn(Value) -> Result<Value, SubstitutionError>,
{
    fn substitute(&self, value: Value) -> Result<Value, SubstitutionError> {
        self(value)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Result of applying one rule
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    /// Per-rule response
    pub response: RuleResponse,
    /// The mutated resource on [`RuleStatus::Pass`], otherwise the input
    pub patched_resource: Value,
}

struct Applied {
    document: Value,
    ops: Vec<RawOp>,
    message: &'static str,
}

/// Apply the `mutate` block of rule `rule_name` to `resource`
#[instrument(skip_all, fields(rule = rule_name))]
pub fn mutate(
    rule_name: &str,
    mutation: &Mutation,
    resource: &Value,
    resolver: &dyn VariableResolver,
    config: &EngineConfig,
) -> MutationResult {
    let start = Instant::now();

    let outcome = match mutation.strategy() {
        Some(spec) => {
            debug!(strategy = spec.kind(), "applying mutation");
            run(&spec, resource, resolver, config).and_then(|applied| {
                let patches = applied
                    .ops
                    .iter()
                    .map(RawOp::to_bytes)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((applied, patches))
            })
        }
        None => Err(Error::EmptyRule),
    };

    let mut result = match outcome {
        Ok((applied, patches)) => {
            info!(patches = %join_patches(&patches), "rule applied");
            MutationResult {
                response: RuleResponse::pass(rule_name, applied.message, patches),
                patched_resource: applied.document,
            }
        }
        Err(e) => {
            let status = e.rule_status();
            match status {
                RuleStatus::Skip => debug!(reason = %e, "rule skipped"),
                _ => info!(%status, error = %e, "rule not applied"),
            }
            MutationResult {
                response: RuleResponse::new(rule_name, status, e.to_string()),
                patched_resource: resource.clone(),
            }
        }
    };

    result.response.processing_time = start.elapsed();
    result
}

fn run(
    spec: &MutationSpec,
    resource: &Value,
    resolver: &dyn VariableResolver,
    config: &EngineConfig,
) -> Result<Applied, Error> {
    match spec {
        MutationSpec::StrategicMerge(patch) => {
            let patch = resolver.substitute(patch.clone())?;
            let document = strategic::apply(resource, &patch, &config.strategic_merge)?;
            Ok(Applied {
                ops: diff::diff(resource, &document, &config.patch_trail),
                document,
                message: "successfully processed strategic merge patch",
            })
        }
        MutationSpec::Overlay(overlay) => {
            let overlay = resolver.substitute(overlay.clone())?;
            let ops = overlay::apply(resource, &Pattern::compile(&overlay))?;
            let document = apply_overlay_ops(resource, &ops)?;
            // leaf replacements with equal values leave nothing to report
            let ops = if document == *resource { Vec::new() } else { ops };
            Ok(Applied {
                document,
                ops,
                message: "successfully processed overlay",
            })
        }
        MutationSpec::Patches(list) => {
            let list = resolver.substitute(Value::Array(list.clone()))?;
            let ops = json6902::decode_value(list)?;
            apply_json_patch(resource, &ops, config)
        }
        MutationSpec::Json6902(raw) => {
            let raw = match resolver.substitute(Value::String(raw.clone()))? {
                Value::String(s) => s,
                other => {
                    return Err(Error::substitution(format!(
                        "patchesJson6902 must stay a string, got {}",
                        value_type_name(&other)
                    )))
                }
            };
            let ops = json6902::decode(&raw)?;
            apply_json_patch(resource, &ops, config)
        }
    }
}

fn apply_overlay_ops(resource: &Value, ops: &[RawOp]) -> Result<Value, Error> {
    let operations = ops
        .iter()
        .map(RawOp::to_patch_operation)
        .collect::<Result<Vec<_>, _>>()?;
    let mut document = resource.clone();
    json_patch::patch(&mut document, &operations)
        .map_err(|e| Error::overlay(format!("failed to apply overlay patches: {e}")))?;
    Ok(document)
}

fn apply_json_patch(
    resource: &Value,
    ops: &[RawOp],
    config: &EngineConfig,
) -> Result<Applied, Error> {
    json6902::validate_paths(ops)?;

    if json6902::should_skip(ops, resource) {
        let path = ops
            .iter()
            .find(|op| op.op == Operation::Add)
            .map(|op| op.path.clone())
            .unwrap_or_default();
        return Err(Error::ReinvocationDuplicate { path });
    }

    let application = json6902::apply(resource, ops)?;
    if application.is_noop() {
        let path = application.tolerated.join(", ");
        return Err(Error::apply(Operation::Remove, path, "path not found"));
    }

    Ok(Applied {
        ops: diff::diff(resource, &application.document, &config.patch_trail),
        document: application.document,
        message: "successfully processed JSON patches",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(value: Value) -> Result<Value, SubstitutionError> {
        Ok(value)
    }

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "nginx", "labels": {"app": "web"}},
            "spec": {"containers": [{"name": "nginx", "image": "nginx:latest"}]}
        })
    }

    fn run_rule(mutation: Mutation, resource: &Value) -> MutationResult {
        mutate("test-rule", &mutation, resource, &identity, &EngineConfig::default())
    }

    // ==========================================================================
    // Story Tests: Strategy selection
    // ==========================================================================

    #[test]
    fn test_strategy_priority() {
        let mutation = Mutation {
            overlay: Some(json!({})),
            patch_strategic_merge: Some(json!({})),
            patches_json6902: Some("[]".to_string()),
            patches: Some(vec![]),
        };
        assert!(matches!(mutation.strategy(), Some(MutationSpec::StrategicMerge(_))));

        let mutation = Mutation {
            patch_strategic_merge: None,
            ..mutation
        };
        assert!(matches!(mutation.strategy(), Some(MutationSpec::Overlay(_))));

        let mutation = Mutation {
            overlay: None,
            ..mutation
        };
        assert!(matches!(mutation.strategy(), Some(MutationSpec::Patches(_))));

        let mutation = Mutation {
            patches: None,
            ..mutation
        };
        assert!(matches!(mutation.strategy(), Some(MutationSpec::Json6902(_))));
    }

    #[test]
    fn test_empty_rule_is_error() {
        let result = run_rule(Mutation::default(), &pod());
        assert_eq!(result.response.status, RuleStatus::Error);
        assert!(result.response.patches.is_empty());
        assert_eq!(result.patched_resource, pod());
    }

    #[test]
    fn test_mutation_deserializes_camel_case() {
        let mutation: Mutation = serde_json::from_value(json!({
            "patchStrategicMerge": {"metadata": {"labels": {"a": "b"}}},
            "patchesJson6902": "- op: remove\n  path: /x\n"
        }))
        .unwrap();
        assert!(mutation.patch_strategic_merge.is_some());
        assert!(mutation.patches_json6902.is_some());
        assert!(mutation.overlay.is_none());
    }

    // ==========================================================================
    // Story Tests: Outcomes
    // ==========================================================================

    #[test]
    fn test_overlay_pass_carries_patches() {
        let result = run_rule(
            Mutation {
                overlay: Some(json!({"metadata": {"labels": {"tier": "frontend"}}})),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Pass);
        assert_eq!(
            result.response.joined_patches(),
            r#"[{"path":"/metadata/labels/tier","op":"add","value":"frontend"}]"#
        );
        assert_eq!(result.patched_resource["metadata"]["labels"]["tier"], "frontend");
    }

    #[test]
    fn test_overlay_already_satisfied_has_no_patches() {
        let result = run_rule(
            Mutation {
                overlay: Some(json!({"metadata": {"labels": {"app": "web"}}})),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Pass);
        assert!(result.response.patches.is_empty());
    }

    #[test]
    fn test_overlay_condition_skips() {
        let result = run_rule(
            Mutation {
                overlay: Some(json!({"metadata": {"(name)": "redis", "labels": {"x": "y"}}})),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Skip);
        assert!(result.response.patches.is_empty());
        assert_eq!(result.patched_resource, pod());
    }

    #[test]
    fn test_strategic_merge_trail_is_diff() {
        let result = run_rule(
            Mutation {
                patch_strategic_merge: Some(json!({"spec": {"containers": [
                    {"(image)": "*:latest", "imagePullPolicy": "Always"}
                ]}})),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Pass);
        assert_eq!(
            result.response.joined_patches(),
            r#"[{"path":"/spec/containers/0/imagePullPolicy","op":"add","value":"Always"}]"#
        );
    }

    #[test]
    fn test_legacy_patches() {
        let result = run_rule(
            Mutation {
                patches: Some(vec![json!({"op": "add", "path": "/spec/replicas", "value": 2})]),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Pass);
        assert_eq!(result.patched_resource["spec"]["replicas"], 2);
    }

    #[test]
    fn test_invalid_path_fails_without_applying() {
        let result = run_rule(
            Mutation {
                patches_json6902: Some(
                    "- op: add\n  path: /metadata/labels/a\n  value: x\n- op: add\n  path: spec\n  value: {}\n"
                        .to_string(),
                ),
                ..Default::default()
            },
            &pod(),
        );
        assert_eq!(result.response.status, RuleStatus::Fail);
        assert_eq!(result.patched_resource, pod());
    }

    // ==========================================================================
    // Story Tests: Substitution
    // ==========================================================================

    #[test]
    fn test_substitution_failure_is_fail() {
        let mut resolver = MockVariableResolver::new();
        resolver
            .expect_substitute()
            .times(1)
            .returning(|_| Err(SubstitutionError::new("variable {{request.object}} not found")));

        let mutation = Mutation {
            overlay: Some(json!({"metadata": {"labels": {"owner": "{{request.object}}"}}})),
            ..Default::default()
        };
        let result = mutate("subst", &mutation, &pod(), &resolver, &EngineConfig::default());
        assert_eq!(result.response.status, RuleStatus::Fail);
        assert!(result.response.message.contains("request.object"));
        assert_eq!(result.patched_resource, pod());
    }

    #[test]
    fn test_substituted_payload_is_applied() {
        let mut resolver = MockVariableResolver::new();
        resolver
            .expect_substitute()
            .returning(|_| Ok(json!({"metadata": {"labels": {"owner": "alice"}}})));

        let mutation = Mutation {
            patch_strategic_merge: Some(json!({"metadata": {"labels": {"owner": "{{user}}"}}})),
            ..Default::default()
        };
        let result = mutate("subst", &mutation, &pod(), &resolver, &EngineConfig::default());
        assert_eq!(result.response.status, RuleStatus::Pass);
        assert_eq!(result.patched_resource["metadata"]["labels"]["owner"], "alice");
    }

    #[test]
    fn test_json6902_substitution_must_return_string() {
        let resolver =
            |_: Value| -> Result<Value, SubstitutionError> { Ok(json!(["not", "a", "string"])) };
        let mutation = Mutation {
            patches_json6902: Some("[]".to_string()),
            ..Default::default()
        };
        let result = mutate("subst", &mutation, &pod(), &resolver, &EngineConfig::default());
        assert_eq!(result.response.status, RuleStatus::Fail);
    }
}
