//! RFC6902 operations as they travel through the engine
//!
//! [`RawOp`] serializes with its keys in the order `path`, `op`, `value`.
//! Downstream consumers of rule responses compare the serialized text, so the
//! order is part of the wire format.

use std::fmt;

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Supported JSON Patch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert a value, or append to an array with `-`
    Add,
    /// Replace an existing value
    Replace,
    /// Remove an existing value
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Add => "add",
            Operation::Replace => "replace",
            Operation::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// A single JSON Patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOp {
    /// JSON pointer to the target location
    pub path: String,
    /// Operation kind
    pub op: Operation,
    /// Operation value, absent for `remove`
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

/// Keeps an explicit `"value": null` as `Some(Value::Null)`
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RawOp {
    /// Create an `add` operation
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: Operation::Add,
            value: Some(value),
        }
    }

    /// Create a `replace` operation
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: Operation::Replace,
            value: Some(value),
        }
    }

    /// Create a `remove` operation
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: Operation::Remove,
            value: None,
        }
    }

    /// Parse the path as a JSON pointer
    pub fn pointer(&self) -> Result<PointerBuf, Error> {
        if !self.path.starts_with('/') {
            return Err(Error::path_validation(
                &self.path,
                "patch path must start with '/'",
            ));
        }
        PointerBuf::parse(self.path.as_str())
            .map_err(|e| Error::path_validation(&self.path, e.to_string()))
    }

    /// Decoded reference tokens of the path
    pub fn tokens(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .pointer()?
            .tokens()
            .map(|t| t.decoded().into_owned())
            .collect())
    }

    /// Convert into the `json_patch` representation used for application
    pub fn to_patch_operation(&self) -> Result<PatchOperation, Error> {
        let path = self.pointer()?;
        let operation = match self.op {
            Operation::Add => PatchOperation::Add(AddOperation {
                path,
                value: self.value_or_null(),
            }),
            Operation::Replace => PatchOperation::Replace(ReplaceOperation {
                path,
                value: self.value_or_null(),
            }),
            Operation::Remove => PatchOperation::Remove(RemoveOperation { path }),
        };
        Ok(operation)
    }

    /// Convert a diff operation; `move`, `copy` and `test` have no counterpart
    pub fn from_patch_operation(operation: &PatchOperation) -> Option<Self> {
        match operation {
            PatchOperation::Add(op) => Some(RawOp::add(op.path.to_string(), op.value.clone())),
            PatchOperation::Replace(op) => {
                Some(RawOp::replace(op.path.to_string(), op.value.clone()))
            }
            PatchOperation::Remove(op) => Some(RawOp::remove(op.path.to_string())),
            _ => None,
        }
    }

    /// Compact JSON with keys in `path`, `op`, `value` order
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// Serialize, then decode the bytes again as a one-element JSON Patch
    ///
    /// Catches ops that would not survive the trip to an admission response.
    pub fn validated(self) -> Result<Self, Error> {
        let bytes = self.to_bytes()?;
        let mut framed = Vec::with_capacity(bytes.len() + 2);
        framed.push(b'[');
        framed.extend_from_slice(&bytes);
        framed.push(b']');
        serde_json::from_slice::<json_patch::Patch>(&framed).map_err(|e| {
            Error::overlay(format!(
                "failed to make '{}' patch for path {}: {}",
                self.op, self.path, e
            ))
        })?;
        Ok(self)
    }

    fn value_or_null(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }
}

impl fmt::Display for RawOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{} {}", self.op, self.path),
        }
    }
}

/// Build a JSON pointer string from unescaped tokens
///
/// Tokens are RFC6901-escaped, so a label key such as `app.kubernetes.io/name`
/// becomes `app.kubernetes.io~1name`.
pub fn pointer_from_tokens<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = String::new();
    for token in tokens {
        path.push('/');
        for ch in token.as_ref().chars() {
            match ch {
                '~' => path.push_str("~0"),
                '/' => path.push_str("~1"),
                other => path.push(other),
            }
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// True if the tokens address something under `metadata.labels` or `metadata.annotations`
pub fn is_label_or_annotation_path<S: AsRef<str>>(tokens: &[S]) -> bool {
    tokens.windows(2).any(|w| {
        w[0].as_ref() == "metadata" && matches!(w[1].as_ref(), "labels" | "annotations")
    })
}

/// Join serialized patches into one JSON array, for logging
pub fn join_patches(patches: &[Vec<u8>]) -> String {
    let mut joined = String::from("[");
    for (i, p) in patches.iter().enumerate() {
        if i > 0 {
            joined.push(',');
        }
        joined.push_str(&String::from_utf8_lossy(p));
    }
    joined.push(']');
    joined
}
