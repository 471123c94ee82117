use serde_json::Value;

pub use swm_transport::PeerId;

/// Protocol family identifier for world-model envelopes.
pub const METAMODEL_RSG: &str = "SHERPA";
/// Message family for world-model queries and updates.
pub const MODEL_RSG_QUERY: &str = "RSGQuery";
/// Envelope kind for outbound world-model requests.
pub const KIND_RSG_QUERY: &str = "RSGQuery";

/// Result kinds the dispatcher correlates by `payload.queryId`.
pub const KIND_RSG_UPDATE_RESULT: &str = "RSGUpdateResult";
pub const KIND_RSG_QUERY_RESULT: &str = "RSGQueryResult";
pub const KIND_RSG_FUNCTION_BLOCK_RESULT: &str = "RSGFunctionBlockResult";

/// Legacy mediator family: different metamodel, correlates by `payload.UID`.
pub const METAMODEL_MEDIATOR: &str = "sherpa_mgs";
pub const MODEL_MEDIATOR_QUERY: &str = "http://kul/query_mediator_uuid.json";
pub const KIND_MEDIATOR_QUERY: &str = "query_mediator_uuid";
pub const KIND_MEDIATOR_RESULT: &str = "mediator_uuid";

/// Preferred correlation field.
pub const FIELD_QUERY_ID: &str = "queryId";
/// Legacy correlation field used by the mediator message family.
pub const FIELD_UID: &str = "UID";

/// Extract the correlation id from a payload: `queryId` preferred, legacy
/// `UID` as fallback. Returns `None` if the payload is not an object or
/// carries neither field as a string.
pub fn correlation_id(payload: &Value) -> Option<&str> {
    payload
        .get(FIELD_QUERY_ID)
        .and_then(Value::as_str)
        .or_else(|| payload.get(FIELD_UID).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_id_preferred_over_uid() {
        let payload = json!({"queryId": "a", "UID": "b"});
        assert_eq!(correlation_id(&payload), Some("a"));
    }

    #[test]
    fn uid_fallback() {
        let payload = json!({"UID": "b"});
        assert_eq!(correlation_id(&payload), Some("b"));
    }

    #[test]
    fn missing_both_is_none() {
        assert_eq!(correlation_id(&json!({"x": 1})), None);
        assert_eq!(correlation_id(&json!("scalar")), None);
        assert_eq!(correlation_id(&json!(null)), None);
    }

    #[test]
    fn non_string_id_is_none() {
        assert_eq!(correlation_id(&json!({"queryId": 42})), None);
    }
}
