//! Kyverno mutation engine
//!
//! Computes mutated Kubernetes resources and an auditable JSON Patch trail from
//! the `mutate` block of a policy rule. Resources are handled as generic JSON
//! trees (`serde_json::Value`), never as typed API structs.
//!
//! # Strategies
//!
//! A rule carries exactly one of the following, tried in this priority order:
//!
//! 1. `patchStrategicMerge` - anchors resolved by [`strategic::preprocess`], then
//!    a 2-way [`strategic::merge`]
//! 2. `overlay` - anchor-aware tree diff in [`overlay`]
//! 3. `patches` - legacy list of RFC6902 operations
//! 4. `patchesJson6902` - RFC6902 operations as JSON or YAML text
//!
//! # Anchors
//!
//! Map keys in overlay and strategic-merge patterns may be wrapped:
//!
//! ```text
//! (image): "*:latest"       conditional - only mutate where the resource matches
//! +(imagePullPolicy): Always add-if-absent - never overwrite an existing value
//! ```
//!
//! # Modules
//!
//! - [`anchor`] - anchor key parsing and the compiled [`Pattern`] tree
//! - [`matcher`] - value pattern language used by conditional anchors
//! - [`overlay`] - overlay condition gate and patch generation
//! - [`strategic`] - strategic-merge preprocessing and merge
//! - [`json6902`] - RFC6902 decode, validation, apply and re-invocation guard
//! - [`diff`] - filtered document diff for patch trails
//! - [`mutate`] - the per-rule dispatcher
//! - [`policy`] - policy document loading and the rule runner

#![deny(missing_docs)]

pub mod anchor;
pub mod config;
pub mod diff;
pub mod error;
pub mod json6902;
pub mod matcher;
pub mod mutate;
pub mod overlay;
pub mod patch;
pub mod policy;
pub mod response;
pub mod strategic;
pub mod yaml;

pub use anchor::{AnchorKey, AnchorKind, Pattern};
pub use config::EngineConfig;
pub use error::Error;
pub use mutate::{mutate, Mutation, MutationResult, MutationSpec, SubstitutionError, VariableResolver};
pub use patch::{Operation, RawOp};
pub use policy::{Policy, PolicyResponse, PolicyRunner, Rule};
pub use response::{RuleResponse, RuleStatus, RuleType};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
