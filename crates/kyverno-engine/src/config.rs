//! Engine configuration
//!
//! Constructed explicitly and passed into every call; the engine keeps no
//! process-wide state.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::Error;
use crate::yaml::parse_yaml;

/// Default list merge key for strategic merge
pub const DEFAULT_MERGE_KEY: &str = "name";

/// Metadata fields kept in patch trails by default
pub const DEFAULT_KEPT_METADATA: [&str; 4] = ["name", "namespace", "labels", "annotations"];

/// Configuration shared by all strategies
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Strategic merge behaviour
    pub strategic_merge: StrategicMergeConfig,
    /// Patch trail filtering
    pub patch_trail: PatchTrailConfig,
}

impl EngineConfig {
    /// Load from a YAML (or JSON) document; missing fields take defaults
    pub fn from_yaml(input: &str) -> Result<Self, Error> {
        let value = parse_yaml(input).map_err(|e| Error::config(e.to_string()))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| Error::config(e.to_string()))
    }
}

/// Strategic merge settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategicMergeConfig {
    /// Merge key used for object lists without an explicit entry
    pub default_merge_key: String,
    /// Merge key per list field name, e.g. `ports: containerPort`
    ///
    /// Entries read from a config file extend the built-in table.
    #[serde(deserialize_with = "extend_default_merge_keys")]
    pub merge_keys: BTreeMap<String, String>,
}

impl Default for StrategicMergeConfig {
    fn default() -> Self {
        let merge_keys = [
            ("ports", "containerPort"),
            ("volumeMounts", "mountPath"),
            ("volumeDevices", "devicePath"),
            ("imagePullSecrets", "name"),
            ("hostAliases", "ip"),
            ("topologySpreadConstraints", "topologyKey"),
        ]
        .into_iter()
        .map(|(field, key)| (field.to_string(), key.to_string()))
        .collect();

        Self {
            default_merge_key: DEFAULT_MERGE_KEY.to_string(),
            merge_keys,
        }
    }
}

fn extend_default_merge_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut merge_keys = StrategicMergeConfig::default().merge_keys;
    merge_keys.extend(BTreeMap::<String, String>::deserialize(deserializer)?);
    Ok(merge_keys)
}

impl StrategicMergeConfig {
    /// Merge key for a list stored under `field`
    pub fn merge_key_for(&self, field: Option<&str>) -> &str {
        field
            .and_then(|f| self.merge_keys.get(f))
            .map(String::as_str)
            .unwrap_or(&self.default_merge_key)
    }
}

/// Patch trail settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatchTrailConfig {
    /// `metadata` subfields whose changes are reported
    pub kept_metadata_fields: Vec<String>,
}

impl Default for PatchTrailConfig {
    fn default() -> Self {
        Self {
            kept_metadata_fields: DEFAULT_KEPT_METADATA.iter().map(|s| s.to_string()).collect(),
        }
    }
}
