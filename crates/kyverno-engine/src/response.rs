//! Per-rule responses

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::patch::join_patches;

/// Outcome of evaluating one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// The rule applied (possibly with zero patches)
    Pass,
    /// The rule could not be applied
    Fail,
    /// The rule did not apply to this resource
    Skip,
    /// The rule itself is unusable
    Error,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleStatus::Pass => "pass",
            RuleStatus::Fail => "fail",
            RuleStatus::Skip => "skip",
            RuleStatus::Error => "error",
        };
        f.pad(s)
    }
}

/// Kind of rule that produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleType {
    /// Mutate rule
    Mutation,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Mutation => f.write_str("Mutation"),
        }
    }
}

/// Result of applying a single mutate rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    /// Rule name
    pub name: String,
    /// Always [`RuleType::Mutation`]
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Outcome
    pub status: RuleStatus,
    /// Human readable explanation
    pub message: String,
    /// Serialized JSON Patch operations, only populated on [`RuleStatus::Pass`]
    #[serde(skip)]
    pub patches: Vec<Vec<u8>>,
    /// Time spent evaluating the rule
    #[serde(skip)]
    pub processing_time: Duration,
}

impl RuleResponse {
    /// Create a response with no patches
    pub fn new(name: impl Into<String>, status: RuleStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule_type: RuleType::Mutation,
            status,
            message: message.into(),
            patches: Vec::new(),
            processing_time: Duration::ZERO,
        }
    }

    /// Create a passing response carrying patches
    pub fn pass(name: impl Into<String>, message: impl Into<String>, patches: Vec<Vec<u8>>) -> Self {
        Self {
            patches,
            ..Self::new(name, RuleStatus::Pass, message)
        }
    }

    /// Patches as one JSON array string
    pub fn joined_patches(&self) -> String {
        join_patches(&self.patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_response_has_no_patches() {
        let resp = RuleResponse::new("add-labels", RuleStatus::Skip, "conditions not met");
        assert_eq!(resp.rule_type, RuleType::Mutation);
        assert!(resp.patches.is_empty());
        assert_eq!(resp.joined_patches(), "[]");
    }

    #[test]
    fn test_serialized_summary() {
        let resp = RuleResponse::pass("set-policy", "ok", vec![b"{}".to_vec()]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["name"], "set-policy");
        assert_eq!(json["type"], "Mutation");
        assert_eq!(json["status"], "pass");
        assert!(json.get("patches").is_none());
    }
}
