use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwmClientError;

/// What a reply timeout does to the owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutPolicy {
    /// Tear the whole component down — one lost reply terminates the node.
    /// This matches the original client's behavior and is the default.
    #[default]
    FailFast,
    /// Fail only the waiting call; the component stays alive.
    FailLocal,
}

/// Validated component configuration.
///
/// Field names mirror the JSON config file consumed by the original client;
/// every key is also projected onto the transport as a capability header so
/// peers can inspect it during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Identity of this component, unique within the group.
    #[serde(rename = "short-name")]
    pub short_name: String,
    /// Default request timeout in milliseconds. Must be positive.
    pub timeout: i64,
    /// Tuning counters carried as discovery metadata. Must be positive.
    pub no_of_updates: i64,
    pub no_of_queries: i64,
    pub no_of_fcn_block_calls: i64,
    /// Optional discovery rendezvous endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip_endpoint: Option<String>,
    /// Group to join on startup.
    #[serde(default = "default_group")]
    pub group: String,
    /// Pause after joining, letting peer discovery settle.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Escalation policy when a reply wait times out.
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
}

fn default_group() -> String {
    "local".to_string()
}

fn default_settle_ms() -> u64 {
    1000
}

impl ComponentConfig {
    /// Parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SwmClientError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| SwmClientError::Config {
            reason: format!("cannot read {}: {e}", path.as_ref().display()),
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| SwmClientError::Config {
                reason: format!("cannot parse {}: {e}", path.as_ref().display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an already-loaded JSON config object.
    pub fn from_value(value: Value) -> Result<Self, SwmClientError> {
        let config: Self = serde_json::from_value(value).map_err(|e| SwmClientError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants serde cannot express: non-empty identity and
    /// strictly positive timeout and tuning counters.
    pub fn validate(&self) -> Result<(), SwmClientError> {
        if self.short_name.is_empty() {
            return Err(invalid("short-name must not be empty"));
        }
        if self.timeout <= 0 {
            return Err(invalid("timeout must be > 0"));
        }
        for (key, value) in [
            ("no_of_updates", self.no_of_updates),
            ("no_of_queries", self.no_of_queries),
            ("no_of_fcn_block_calls", self.no_of_fcn_block_calls),
        ] {
            if value <= 0 {
                return Err(invalid(&format!("{key} must be > 0")));
            }
        }
        Ok(())
    }

    /// Project every config key as a `(key, value)` header pair. String
    /// values are taken verbatim, everything else as compact JSON — the same
    /// projection the original client applied to its transport headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        let Value::Object(map) = serde_json::to_value(self).expect("config serializes to object")
        else {
            unreachable!("config always serializes to a JSON object")
        };
        map.into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect()
    }

    /// Default request timeout as milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout as u64
    }
}

fn invalid(reason: &str) -> SwmClientError {
    SwmClientError::Config {
        reason: reason.to_string(),
    }
}
