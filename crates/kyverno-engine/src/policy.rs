//! Policy documents and the rule runner
//!
//! Only the parts of a `Policy` / `ClusterPolicy` the mutation engine needs
//! are modelled: the policy name and each rule's `name` and `mutate` block.
//! Rules without a `mutate` block are ignored.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info_span};

use crate::config::EngineConfig;
use crate::error::Error;
use crate::mutate::{mutate, Mutation, VariableResolver};
use crate::response::{RuleResponse, RuleStatus};
use crate::yaml::parse_yaml_multi;

/// A policy with its mutate rules
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// `metadata.name`
    pub name: String,
    /// Mutate rules in document order
    pub rules: Vec<Rule>,
}

/// A named mutate rule
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Rule name
    pub name: String,
    /// The rule's `mutate` block
    pub mutation: Mutation,
}

#[derive(Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    spec: PolicySpec,
}

#[derive(Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct PolicySpec {
    #[serde(default)]
    rules: Vec<RuleDocument>,
}

#[derive(Deserialize)]
struct RuleDocument {
    name: String,
    #[serde(default)]
    mutate: Option<Mutation>,
}

impl Policy {
    /// Load every policy in a (multi-document) YAML string
    pub fn from_yaml(input: &str) -> Result<Vec<Policy>, Error> {
        parse_yaml_multi(input)
            .map_err(|e| Error::policy(e.to_string()))?
            .into_iter()
            .map(Policy::from_value)
            .collect()
    }

    /// Build a policy from a parsed document
    pub fn from_value(value: Value) -> Result<Policy, Error> {
        let doc: PolicyDocument =
            serde_json::from_value(value).map_err(|e| Error::policy(e.to_string()))?;

        if let Some(kind) = doc.kind.as_deref() {
            if !matches!(kind, "ClusterPolicy" | "Policy") {
                return Err(Error::policy(format!(
                    "unsupported kind '{kind}', expected ClusterPolicy or Policy"
                )));
            }
        }

        let rules = doc
            .spec
            .rules
            .into_iter()
            .filter_map(|r| {
                r.mutate.map(|mutation| Rule {
                    name: r.name,
                    mutation,
                })
            })
            .collect();

        Ok(Policy {
            name: doc.metadata.name,
            rules,
        })
    }
}

/// Responses for every rule plus the final resource
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResponse {
    /// One response per rule, in application order
    pub rules: Vec<RuleResponse>,
    /// The resource after all passing rules
    pub patched_resource: Value,
}

impl PolicyResponse {
    /// Serialized patches of all passing rules, in order
    pub fn patches(&self) -> Vec<Vec<u8>> {
        self.rules
            .iter()
            .flat_map(|r| r.patches.iter().cloned())
            .collect()
    }

    /// Number of rules that failed or errored
    pub fn failure_count(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| matches!(r.status, RuleStatus::Fail | RuleStatus::Error))
            .count()
    }

    /// True if any rule failed or errored
    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

/// Applies policies rule by rule, threading the patched resource through
#[derive(Debug, Clone, Default)]
pub struct PolicyRunner {
    config: EngineConfig,
}

impl PolicyRunner {
    /// Create a runner with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run every rule of every policy against `resource`
    pub fn run(
        &self,
        policies: &[Policy],
        resource: &Value,
        resolver: &dyn VariableResolver,
    ) -> PolicyResponse {
        let mut current = resource.clone();
        let mut rules = Vec::new();

        for policy in policies {
            let _span = info_span!("policy", policy = %policy.name).entered();
            for rule in &policy.rules {
                let result = mutate(&rule.name, &rule.mutation, &current, resolver, &self.config);
                debug!(rule = %rule.name, status = %result.response.status, "rule evaluated");
                current = result.patched_resource;
                rules.push(result.response);
            }
        }

        PolicyResponse {
            rules,
            patched_resource: current,
        }
    }
}
