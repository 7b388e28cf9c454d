//! Error types for the mutation engine
//!
//! Every variant maps to the [`RuleStatus`] a rule response reports, so callers
//! never have to re-derive the status from an error message.

use thiserror::Error;

use crate::response::RuleStatus;

/// Main error type for mutation operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Variable substitution in the rule payload failed
    #[error("variable substitution failed: {0}")]
    Substitution(String),

    /// Converting between resource documents and JSON failed
    #[error("failed to marshal resource: {0}")]
    Marshal(#[from] serde_json::Error),

    /// Patch text could not be decoded as JSON or YAML operations
    #[error("failed to decode patch: {0}")]
    PatchDecode(String),

    /// A patch path is not an absolute JSON pointer
    #[error("invalid patch path '{path}': {message}")]
    PathValidation {
        /// The offending path
        path: String,
        /// What is wrong with it
        message: String,
    },

    /// Applying an operation to the resource failed
    #[error("failed to apply '{op}' at {path}: {message}")]
    Apply {
        /// Operation kind (add, replace, remove)
        op: String,
        /// Target path
        path: String,
        /// Underlying cause
        message: String,
    },

    /// A conditional anchor did not match the resource
    #[error("conditions are not met: {0}")]
    ConditionNotMet(String),

    /// The patch would insert an element the resource already holds
    #[error("duplicate patch at {path}: value is already present")]
    ReinvocationDuplicate {
        /// Path of the duplicated add
        path: String,
    },

    /// The rule has no mutation field populated
    #[error("no mutation specified in rule")]
    EmptyRule,

    /// Overlay and resource elements have incompatible types
    #[error("overlay type conflict: {0}")]
    OverlayTypeConflict(String),

    /// Any other overlay failure
    #[error("failed to process overlay: {0}")]
    Overlay(String),

    /// Strategic-merge preprocessing failure
    #[error("failed to preprocess strategic merge patch: {0}")]
    Preprocess(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// A policy document is malformed
    #[error("invalid policy: {0}")]
    Policy(String),
}

impl Error {
    /// Create a substitution error with the given message
    pub fn substitution(msg: impl Into<String>) -> Self {
        Self::Substitution(msg.into())
    }

    /// Create a patch decode error with the given message
    pub fn patch_decode(msg: impl Into<String>) -> Self {
        Self::PatchDecode(msg.into())
    }

    /// Create a path validation error
    pub fn path_validation(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PathValidation {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error
    pub fn apply(op: impl ToString, path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Apply {
            op: op.to_string(),
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an overlay error with the given message
    pub fn overlay(msg: impl Into<String>) -> Self {
        Self::Overlay(msg.into())
    }

    /// Create a preprocessing error with the given message
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a policy error with the given message
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    /// Status a rule response reports for this error
    pub fn rule_status(&self) -> RuleStatus {
        match self {
            Error::ConditionNotMet(_) | Error::ReinvocationDuplicate { .. } => RuleStatus::Skip,
            Error::Apply { op, .. } if op == "remove" => RuleStatus::Skip,
            Error::EmptyRule | Error::Config(_) | Error::Policy(_) => RuleStatus::Error,
            _ => RuleStatus::Fail,
        }
    }
}
