//! Anchor keys and compiled patterns
//!
//! Anchors are parsed exactly once, when a pattern document is compiled into a
//! [`Pattern`]. Tree walks then match on [`AnchorKind`] instead of inspecting
//! key strings over and over.

use std::fmt;

use serde_json::{Map, Value};

use crate::matcher::ScalarPattern;

/// Kind of anchor wrapped around a map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorKind {
    /// Plain key
    None,
    /// `(key)` - the subtree only applies where the resource value matches
    Conditional,
    /// `+(key)` - the value is only added when the resource lacks the key
    AddIfAbsent,
}

/// A parsed map key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnchorKey {
    raw_key: String,
    kind: AnchorKind,
}

impl AnchorKey {
    /// Parse a pattern key into its unwrapped form and anchor kind
    pub fn parse(key: &str) -> Self {
        if let Some(inner) = key.strip_prefix("+(").and_then(|k| k.strip_suffix(')')) {
            if !inner.is_empty() {
                return Self::new(inner, AnchorKind::AddIfAbsent);
            }
        }

        if let Some(inner) = key.strip_prefix('(').and_then(|k| k.strip_suffix(')')) {
            if !inner.is_empty() {
                return Self::new(inner, AnchorKind::Conditional);
            }
        }

        Self::new(key, AnchorKind::None)
    }

    /// Create a key with an explicit kind
    pub fn new(raw_key: impl Into<String>, kind: AnchorKind) -> Self {
        Self {
            raw_key: raw_key.into(),
            kind,
        }
    }

    /// The key with any anchor wrapping removed
    pub fn key(&self) -> &str {
        &self.raw_key
    }

    /// The anchor kind
    pub fn kind(&self) -> AnchorKind {
        self.kind
    }

    /// True for `(key)`
    pub fn is_conditional(&self) -> bool {
        self.kind == AnchorKind::Conditional
    }

    /// True for `+(key)`
    pub fn is_add_if_absent(&self) -> bool {
        self.kind == AnchorKind::AddIfAbsent
    }

    /// True for any anchored key
    pub fn is_anchor(&self) -> bool {
        self.kind != AnchorKind::None
    }
}

impl fmt::Display for AnchorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AnchorKind::None => write!(f, "{}", self.raw_key),
            AnchorKind::Conditional => write!(f, "({})", self.raw_key),
            AnchorKind::AddIfAbsent => write!(f, "+({})", self.raw_key),
        }
    }
}

/// A pattern document with every map key parsed into an [`AnchorKey`]
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Map entries in document order
    Object(Vec<(AnchorKey, Pattern)>),
    /// Sequence elements
    Array(Vec<Pattern>),
    /// String, number, bool or null, with string patterns compiled
    Scalar(ScalarPattern),
}

impl Pattern {
    /// Compile a JSON tree into a pattern
    pub fn compile(value: &Value) -> Self {
        match value {
            Value::Object(map) => Pattern::Object(
                map.iter()
                    .map(|(k, v)| (AnchorKey::parse(k), Pattern::compile(v)))
                    .collect(),
            ),
            Value::Array(items) => Pattern::Array(items.iter().map(Pattern::compile).collect()),
            scalar => Pattern::Scalar(ScalarPattern::new(scalar.clone())),
        }
    }

    /// Render back to JSON keeping anchor wrapping
    pub fn to_value(&self) -> Value {
        match self {
            Pattern::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
            Pattern::Array(items) => Value::Array(items.iter().map(Pattern::to_value).collect()),
            Pattern::Scalar(v) => v.value().clone(),
        }
    }

    /// Render to JSON with every anchor unwrapped
    pub fn strip_anchors(&self) -> Value {
        match self {
            Pattern::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.key().to_string(), v.strip_anchors()))
                    .collect::<Map<String, Value>>(),
            ),
            Pattern::Array(items) => {
                Value::Array(items.iter().map(Pattern::strip_anchors).collect())
            }
            Pattern::Scalar(v) => v.value().clone(),
        }
    }

    /// Look up an entry by its unwrapped key
    pub fn get(&self, key: &str) -> Option<(&AnchorKey, &Pattern)> {
        match self {
            Pattern::Object(entries) => entries
                .iter()
                .find(|(k, _)| k.key() == key)
                .map(|(k, v)| (k, v)),
            _ => None,
        }
    }

    /// True if this node is an object with at least one anchored key
    pub fn has_top_level_anchors(&self) -> bool {
        match self {
            Pattern::Object(entries) => entries.iter().any(|(k, _)| k.is_anchor()),
            _ => false,
        }
    }

    /// True if any key at or below this node is anchored
    pub fn has_anchors(&self) -> bool {
        match self {
            Pattern::Object(entries) => entries
                .iter()
                .any(|(k, v)| k.is_anchor() || v.has_anchors()),
            Pattern::Array(items) => items.iter().any(Pattern::has_anchors),
            Pattern::Scalar(_) => false,
        }
    }

    /// True if any key at or below this node is a conditional anchor
    pub fn has_conditions(&self) -> bool {
        match self {
            Pattern::Object(entries) => entries
                .iter()
                .any(|(k, v)| k.is_conditional() || v.has_conditions()),
            Pattern::Array(items) => items.iter().any(Pattern::has_conditions),
            Pattern::Scalar(_) => false,
        }
    }

    /// True if the subtree has nothing but conditions to contribute
    ///
    /// An object qualifies when all of its keys are conditional anchors, or
    /// when every value qualifies. Empty objects and arrays qualify; scalars
    /// never do. `+(key)` entries carry values, so they do not count.
    pub fn has_only_anchors(&self) -> bool {
        match self {
            Pattern::Object(entries) => {
                entries.iter().all(|(k, _)| k.is_conditional())
                    || entries.iter().all(|(_, v)| v.has_only_anchors())
            }
            Pattern::Array(items) => items.iter().all(Pattern::has_only_anchors),
            Pattern::Scalar(_) => false,
        }
    }

    /// JSON type name, used for type-conflict detection and messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Pattern::Object(_) => "object",
            Pattern::Array(_) => "array",
            Pattern::Scalar(v) => value_type_name(v.value()),
        }
    }
}

/// JSON type name of a value
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "bool",
        Value::Null => "null",
    }
}

/// True if any key in the JSON tree carries an anchor
pub fn has_anchors(tree: &Value) -> bool {
    Pattern::compile(tree).has_anchors()
}

/// True if the JSON tree is anchor-only
pub fn has_only_anchors(tree: &Value) -> bool {
    Pattern::compile(tree).has_only_anchors()
}
