//! RFC6902 patches supplied directly by a rule
//!
//! `patchesJson6902` is text, either a JSON array or a YAML sequence. The ops
//! are validated as a set before anything is applied, then applied one at a
//! time so a `remove` of a path the resource never had can be tolerated.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;
use crate::patch::{pointer_from_tokens, Operation, RawOp};
use crate::yaml::parse_yaml;

/// Outcome of applying a list of operations
#[derive(Debug, Clone, PartialEq)]
pub struct PatchApplication {
    /// The patched document
    pub document: Value,
    /// Number of ops that changed the document
    pub applied: usize,
    /// Paths of `remove` ops whose target did not exist
    pub tolerated: Vec<String>,
}

impl PatchApplication {
    /// True when every op was a tolerated `remove`
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && !self.tolerated.is_empty()
    }
}

/// Decode operations from JSON or YAML text
pub fn decode(raw: &str) -> Result<Vec<RawOp>, Error> {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => parse_yaml(raw).map_err(|e| Error::patch_decode(e.to_string()))?,
    };
    decode_value(value)
}

/// Decode operations from an already parsed tree
pub fn decode_value(value: Value) -> Result<Vec<RawOp>, Error> {
    if !value.is_array() {
        return Err(Error::patch_decode(format!(
            "expected a list of operations, got {}",
            crate::anchor::value_type_name(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| Error::patch_decode(e.to_string()))
}

/// Reject the whole set if any path is not an absolute JSON pointer
pub fn validate_paths(ops: &[RawOp]) -> Result<(), Error> {
    for op in ops {
        op.pointer()?;
    }
    Ok(())
}

/// Apply `ops` in order to a copy of `resource`
///
/// A failing `remove` is recorded in [`PatchApplication::tolerated`]. A failing
/// `add` or `replace` aborts with [`Error::Apply`].
pub fn apply(resource: &Value, ops: &[RawOp]) -> Result<PatchApplication, Error> {
    let mut document = resource.clone();
    let mut applied = 0;
    let mut tolerated = Vec::new();

    for op in ops {
        let operation = op.to_patch_operation()?;
        match json_patch::patch(&mut document, std::slice::from_ref(&operation)) {
            Ok(()) => applied += 1,
            Err(e) if op.op == Operation::Remove => {
                debug!(path = %op.path, error = %e, "remove target missing, ignored");
                tolerated.push(op.path.clone());
            }
            Err(e) => {
                warn!(op = %op.op, path = %op.path, error = %e, "failed to apply patch");
                return Err(Error::apply(op.op, &op.path, e.to_string()));
            }
        }
    }

    Ok(PatchApplication {
        document,
        applied,
        tolerated,
    })
}

/// Re-invocation guard
///
/// True when every `add` that targets a list index (or `-`) inserts an object
/// the list already holds, so applying the patch again would duplicate it.
/// Adds with non-object values disable the guard.
pub fn should_skip(ops: &[RawOp], resource: &Value) -> bool {
    let mut candidates = 0;

    for op in ops.iter().filter(|o| o.op == Operation::Add) {
        let Ok(tokens) = op.tokens() else {
            return false;
        };
        let Some((last, parent)) = tokens.split_last() else {
            continue;
        };

        let index = match last.as_str() {
            "-" => None,
            other => match other.parse::<usize>() {
                Ok(idx) => Some(idx),
                Err(_) => continue,
            },
        };

        let list = if parent.is_empty() {
            Some(resource)
        } else {
            resource.pointer(&pointer_from_tokens(parent.iter()))
        };
        let Some(list) = list.and_then(Value::as_array) else {
            continue;
        };

        candidates += 1;
        let Some(value @ Value::Object(_)) = &op.value else {
            return false;
        };

        let present = match index {
            Some(idx) => list.get(idx).is_some_and(|e| is_subset(value, e)),
            None => list.iter().any(|e| is_subset(value, e)),
        };
        if !present {
            return false;
        }
    }

    candidates > 0
}

/// Structural subset: every field of `subset` is present in `superset`
pub fn is_subset(subset: &Value, superset: &Value) -> bool {
    match (subset, superset) {
        (Value::Object(sub), Value::Object(sup)) => sub
            .iter()
            .all(|(k, v)| sup.get(k).is_some_and(|s| is_subset(v, s))),
        (Value::Array(sub), Value::Array(sup)) => sub
            .iter()
            .all(|v| sup.iter().any(|s| is_subset(v, s))),
        (a, b) => a == b,
    }
}
