use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwmClientError;
use crate::types::{
    self, KIND_MEDIATOR_QUERY, KIND_RSG_QUERY, METAMODEL_MEDIATOR, METAMODEL_RSG,
    MODEL_MEDIATOR_QUERY, MODEL_RSG_QUERY,
};

/// The wire unit — a four-field JSON wrapper around an opaque payload.
///
/// `metamodel` names the protocol family, `model` the message family, `kind`
/// (serialized as `"type"`) the message kind. The payload is carried as-is;
/// the envelope routes without interpreting it beyond the correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub metamodel: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    /// Wrap a payload in the standard world-model request envelope.
    pub fn request(payload: Value) -> Self {
        Self {
            metamodel: METAMODEL_RSG.to_string(),
            model: MODEL_RSG_QUERY.to_string(),
            kind: KIND_RSG_QUERY.to_string(),
            payload,
        }
    }

    /// Wrap a payload in the legacy mediator request envelope.
    pub fn mediator_request(payload: Value) -> Self {
        Self {
            metamodel: METAMODEL_MEDIATOR.to_string(),
            model: MODEL_MEDIATOR_QUERY.to_string(),
            kind: KIND_MEDIATOR_QUERY.to_string(),
            payload,
        }
    }

    /// Parse an envelope from wire text.
    ///
    /// All four top-level fields must be present; `metamodel`, `model` and
    /// `type` must be non-empty strings. The payload is accepted as any JSON
    /// value. Failure is a recoverable decode error — callers log and drop.
    pub fn decode(text: &str) -> Result<Self, SwmClientError> {
        let root: Value = serde_json::from_str(text).map_err(|e| SwmClientError::Decode {
            reason: format!("not valid JSON: {e}"),
        })?;

        let metamodel = require_string(&root, "metamodel")?;
        let model = require_string(&root, "model")?;
        let kind = require_string(&root, "type")?;
        let payload = root
            .get("payload")
            .cloned()
            .ok_or_else(|| missing_field("payload"))?;

        Ok(Self {
            metamodel,
            model,
            kind,
            payload,
        })
    }

    /// Serialize to wire text.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization cannot fail")
    }

    /// The payload re-serialized to text, as handed back to waiting callers.
    pub fn payload_text(&self) -> String {
        serde_json::to_string(&self.payload).expect("payload serialization cannot fail")
    }

    /// Correlation id of the payload (`queryId`, legacy `UID` fallback).
    pub fn correlation_id(&self) -> Option<&str> {
        types::correlation_id(&self.payload)
    }
}

fn require_string(root: &Value, field: &str) -> Result<String, SwmClientError> {
    let value = root.get(field).ok_or_else(|| missing_field(field))?;
    match value.as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(SwmClientError::Decode {
            reason: format!("field `{field}` is empty"),
        }),
        None => Err(SwmClientError::Decode {
            reason: format!("field `{field}` is not a string"),
        }),
    }
}

fn missing_field(field: &str) -> SwmClientError {
    SwmClientError::Decode {
        reason: format!("missing field `{field}`"),
    }
}
