//! Static `{{key}}` substitution from `--set` pairs

use std::collections::BTreeMap;

use kyverno_engine::{SubstitutionError, VariableResolver};
use serde_json::Value;

/// Resolves `{{ key }}` references from a fixed set of values
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    values: BTreeMap<String, String>,
}

impl StaticResolver {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    fn substitute_str(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let name = rest[start + 2..start + 2 + len].trim();
            let value = self.values.get(name).ok_or_else(|| {
                SubstitutionError::new(format!("variable {{{{{name}}}}} not defined"))
            })?;
            out.push_str(&rest[..start]);
            out.push_str(value);
            rest = &rest[start + 2 + len + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl VariableResolver for StaticResolver {
    fn substitute(&self, value: Value) -> Result<Value, SubstitutionError> {
        match value {
            Value::String(s) => self.substitute_str(&s).map(Value::String),
            Value::Array(items) => items
                .into_iter()
                .map(|v| self.substitute(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| self.substitute(v).map(|v| (k, v)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other),
        }
    }
}

/// Parse a `key=value` argument
pub fn parse_key_val(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{arg}'")),
    }
}
