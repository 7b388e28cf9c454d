//! Strategic merge patches with anchors
//!
//! [`preprocess`] turns an anchored pattern into a plain patch for one
//! resource, then [`merge`] applies it.

pub mod merge;
pub mod preprocess;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::anchor::Pattern;
use crate::config::StrategicMergeConfig;
use crate::error::Error;
use crate::patch::pointer_from_tokens;

pub use merge::merge;
pub use preprocess::preprocess;

/// Errors raised while resolving anchors in a strategic merge patch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    /// A conditional anchor is missing or does not match
    #[error("condition failed at {path}: {message}")]
    Condition {
        /// Pointer to the condition
        path: String,
        /// Detail
        message: String,
    },

    /// The pattern cannot be resolved
    #[error("{0}")]
    Invalid(String),

    /// A patch element lacks the merge key its fully keyed target list uses
    #[error("list '{field}' merges by '{key}' but patch element {element} has no '{key}'")]
    MissingMergeKey {
        /// Field holding the list
        field: String,
        /// Merge key of the list
        key: String,
        /// The offending element
        element: String,
    },
}

impl PreprocessError {
    pub(crate) fn condition(path: &[String], message: impl Into<String>) -> Self {
        Self::Condition {
            path: pointer_from_tokens(path.iter()),
            message: message.into(),
        }
    }
}

impl From<PreprocessError> for Error {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::Condition { .. } => Error::ConditionNotMet(err.to_string()),
            PreprocessError::Invalid(msg) => Error::preprocess(msg),
            PreprocessError::MissingMergeKey { .. } => Error::preprocess(err.to_string()),
        }
    }
}

/// Resolve `pattern` against `resource` and merge the result in
pub fn apply(
    resource: &Value,
    pattern: &Value,
    config: &StrategicMergeConfig,
) -> Result<Value, PreprocessError> {
    if !pattern.is_object() {
        return Err(PreprocessError::Invalid(format!(
            "strategic merge patch must be an object, got {}",
            crate::anchor::value_type_name(pattern)
        )));
    }

    let resolved = preprocess(&Pattern::compile(pattern), resource)?;
    debug!(patch = %resolved, "strategic merge patch resolved");
    merge(resource, &resolved, config)
}
