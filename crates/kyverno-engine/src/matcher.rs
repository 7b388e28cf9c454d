//! Value pattern matching for conditional anchors
//!
//! A conditional anchor such as `"(image)": "*:latest"` holds a pattern that
//! the resource value must satisfy. String patterns support:
//!
//! - wildcards: `*` matches any run of characters, `?` exactly one
//! - alternation with `|` and conjunction with `&`
//! - `!` / `!=` negation
//! - numeric comparisons `>`, `>=`, `<`, `<=`
//! - ranges `low-high` (inclusive) and `low!-high` (outside)
//!
//! Non-string patterns compare by value: bools exactly, numbers numerically,
//! and `null` matches any empty value.

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::anchor::{AnchorKind, Pattern};

/// Check a resource value against a compiled pattern
pub fn matches(value: &Value, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Scalar(p) => p.matches(value),
        Pattern::Object(entries) => {
            let Some(map) = value.as_object() else {
                return false;
            };
            entries.iter().all(|(key, sub)| match (key.kind(), map.get(key.key())) {
                (AnchorKind::AddIfAbsent, _) => true,
                (AnchorKind::Conditional, None) => true,
                (_, Some(v)) => matches(v, sub),
                (AnchorKind::None, None) => false,
            })
        }
        Pattern::Array(items) => {
            let Some(values) = value.as_array() else {
                return false;
            };
            items
                .iter()
                .all(|item| values.iter().any(|v| matches(v, item)))
        }
    }
}

/// Check a resource value against a raw JSON pattern value
pub fn matches_value(value: &Value, pattern: &Value) -> bool {
    matches(value, &Pattern::compile(pattern))
}

/// A scalar pattern leaf
///
/// String patterns are parsed into alternatives of terms when the leaf is
/// built, so wildcard regexes are compiled once per pattern and not per match.
#[derive(Debug, Clone)]
pub struct ScalarPattern {
    value: Value,
    alternatives: Vec<Vec<Term>>,
}

impl PartialEq for ScalarPattern {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl ScalarPattern {
    /// Compile a string, number, bool or null pattern
    pub fn new(value: Value) -> Self {
        let alternatives = match &value {
            Value::String(s) => s
                .split('|')
                .map(|alternative| alternative.split('&').map(|t| Term::parse(t.trim())).collect())
                .collect(),
            _ => Vec::new(),
        };
        Self { value, alternatives }
    }

    /// The pattern as written in the policy
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Check a resource value against this leaf
    pub fn matches(&self, value: &Value) -> bool {
        match &self.value {
            Value::Bool(expected) => value.as_bool() == Some(*expected),
            Value::Number(n) => match (as_number(value), n.as_f64()) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            Value::Null => is_empty(value),
            Value::String(_) => self
                .alternatives
                .iter()
                .any(|terms| terms.iter().all(|term| term.matches(value))),
            // Object and array patterns are compiled into Pattern nodes
            Value::Object(_) | Value::Array(_) => false,
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Object(_) | Value::Array(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}

/// Comparison operator at the start of a pattern term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    NotEqual,
    More,
    MoreEqual,
    Less,
    LessEqual,
}

impl Operator {
    fn split(term: &str) -> (Self, &str) {
        const PREFIXES: [(&str, Operator); 6] = [
            (">=", Operator::MoreEqual),
            ("<=", Operator::LessEqual),
            ("!=", Operator::NotEqual),
            (">", Operator::More),
            ("<", Operator::Less),
            ("!", Operator::NotEqual),
        ];
        for (prefix, op) in PREFIXES {
            if let Some(rest) = term.strip_prefix(prefix) {
                return (op, rest.trim());
            }
        }
        (Operator::Equal, term)
    }
}

/// One `&`-joined piece of a string pattern
#[derive(Debug, Clone)]
enum Term {
    Inside(f64, f64),
    Outside(f64, f64),
    Compare {
        op: Operator,
        number: Option<f64>,
        text: TextMatcher,
    },
}

impl Term {
    fn parse(term: &str) -> Self {
        if let Some((low, high)) = split_range(term, "!-") {
            return Term::Outside(low, high);
        }
        if let Some((low, high)) = split_range(term, "-") {
            return Term::Inside(low, high);
        }
        let (op, operand) = Operator::split(term);
        Term::Compare {
            op,
            number: operand.parse().ok(),
            text: TextMatcher::new(operand),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Term::Inside(low, high) => as_number(value).is_some_and(|v| v >= *low && v <= *high),
            Term::Outside(low, high) => as_number(value).is_some_and(|v| v < *low || v > *high),
            Term::Compare { op, number, text } => match op {
                Operator::Equal => matches_equal(value, *number, text),
                Operator::NotEqual => !matches_equal(value, *number, text),
                ordering => match (as_number(value), number) {
                    (Some(actual), Some(expected)) => match ordering {
                        Operator::More => actual > *expected,
                        Operator::MoreEqual => actual >= *expected,
                        Operator::Less => actual < *expected,
                        Operator::LessEqual => actual <= *expected,
                        Operator::Equal | Operator::NotEqual => false,
                    },
                    _ => {
                        trace!(?ordering, "ordering operator needs numeric operands");
                        false
                    }
                },
            },
        }
    }
}

fn matches_equal(value: &Value, number: Option<f64>, text: &TextMatcher) -> bool {
    if let (Some(actual), Some(expected)) = (as_number(value), number) {
        if actual == expected {
            return true;
        }
    }
    as_text(value).is_some_and(|t| text.is_match(&t))
}

/// Split `low<sep>high` where both sides are numbers
fn split_range(term: &str, separator: &str) -> Option<(f64, f64)> {
    // A leading '-' belongs to a negative number, not the separator
    let start = usize::from(term.starts_with('-'));
    let idx = term[start..].find(separator)? + start;
    let low = term[..idx].trim().parse().ok()?;
    let high = term[idx + separator.len()..].trim().parse().ok()?;
    Some((low, high))
}

/// Literal or wildcard text comparison
#[derive(Debug, Clone)]
enum TextMatcher {
    Exact(String),
    Wildcard(Regex),
    /// Matches nothing
    Invalid,
}

impl TextMatcher {
    fn new(pattern: &str) -> Self {
        if !pattern.contains(['*', '?']) {
            return TextMatcher::Exact(pattern.to_string());
        }
        match wildcard_regex(pattern) {
            Ok(re) => TextMatcher::Wildcard(re),
            Err(e) => {
                trace!(pattern, error = %e, "invalid wildcard pattern");
                TextMatcher::Invalid
            }
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            TextMatcher::Exact(expected) => expected == text,
            TextMatcher::Wildcard(re) => re.is_match(text),
            TextMatcher::Invalid => false,
        }
    }
}

/// Match text against a wildcard pattern where `*` is any run and `?` one char
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    TextMatcher::new(pattern).is_match(text)
}

fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("^(?s:");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push_str(")$");
    Regex::new(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("*-nginx", "web-nginx", true)]
    #[case("*-nginx", "nginxweb", false)]
    #[case("*:latest", "nginx:latest", true)]
    #[case("*:latest", "nginx:1.21", false)]
    #[case("nginx:?.??", "nginx:1.21", true)]
    #[case("a.b", "aXb", false)]
    #[case("*", "", true)]
    #[case("exact", "exact", true)]
    fn test_wildcard_match(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(wildcard_match(pattern, text), expected);
    }

    #[rstest]
    #[case(json!("TCP"), json!("TCP|UDP"), true)]
    #[case(json!("SCTP"), json!("TCP|UDP"), false)]
    #[case(json!(443), json!(">400 & <500"), true)]
    #[case(json!(80), json!(">400 & <500"), false)]
    #[case(json!(5), json!("1-10"), true)]
    #[case(json!(11), json!("1-10"), false)]
    #[case(json!(11), json!("1!-10"), true)]
    #[case(json!("8080"), json!(">=8080"), true)]
    #[case(json!("nginx"), json!("!nginx"), false)]
    #[case(json!("redis"), json!("!=nginx"), true)]
    #[case(json!(true), json!(true), true)]
    #[case(json!("true"), json!(true), false)]
    #[case(json!(443), json!(443), true)]
    #[case(json!(443.0), json!(443), true)]
    #[case(json!("443"), json!(443), true)]
    #[case(json!(""), json!(null), true)]
    #[case(json!("x"), json!(null), false)]
    #[case(json!(-5), json!("-10-0"), true)]
    fn test_scalar_patterns(#[case] value: Value, #[case] pattern: Value, #[case] expected: bool) {
        assert_eq!(matches_value(&value, &pattern), expected, "{value} vs {pattern}");
    }

    #[test]
    fn test_object_pattern_requires_plain_keys() {
        let pattern = json!({"name": "web-*", "(port)": 80});
        assert!(matches_value(&json!({"name": "web-1", "port": 80}), &pattern));
        assert!(matches_value(&json!({"name": "web-1"}), &pattern));
        assert!(!matches_value(&json!({"name": "web-1", "port": 81}), &pattern));
        assert!(!matches_value(&json!({"port": 80}), &pattern));
        assert!(!matches_value(&json!("web-1"), &pattern));
    }

    #[test]
    fn test_scalar_pattern_compiles_wildcards_up_front() {
        let pattern = ScalarPattern::new(json!("nginx:* | redis:6"));
        assert!(matches!(
            pattern.alternatives[0].as_slice(),
            [Term::Compare { text: TextMatcher::Wildcard(_), .. }]
        ));
        assert!(matches!(
            pattern.alternatives[1].as_slice(),
            [Term::Compare { text: TextMatcher::Exact(_), .. }]
        ));
        for image in ["nginx:1.21", "nginx:latest", "redis:6"] {
            assert!(pattern.matches(&json!(image)), "{image}");
        }
        assert!(!pattern.matches(&json!("redis:7")));
        assert_eq!(pattern, ScalarPattern::new(json!("nginx:* | redis:6")));
    }

    #[test]
    fn test_array_pattern_needs_each_item_somewhere() {
        let pattern = json!([{"name": "secure-*"}]);
        let ports = json!([{"name": "http"}, {"name": "secure-connection"}]);
        assert!(matches_value(&ports, &pattern));
        assert!(!matches_value(&json!([{"name": "http"}]), &pattern));
    }
}
