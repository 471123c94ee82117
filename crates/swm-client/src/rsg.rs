//! World-model payload builders.
//!
//! Stateless JSON document builders for the Robot Scene Graph API, layered
//! on top of the correlation core. None of these assign a correlation id —
//! [`Component::encode_message`](crate::Component::encode_message) attaches
//! one when the payload is wrapped for the wire. The one exception is the
//! legacy mediator query, whose `UID` field doubles as the correlation id.

use serde_json::{json, Map, Value};

use crate::error::SwmClientError;
use crate::types::FIELD_UID;

/// A `{"key": ..., "value": ...}` node attribute.
pub fn attribute(key: &str, value: impl Into<Value>) -> Value {
    json!({ "key": key, "value": value.into() })
}

/// A generic world-model query, e.g. `GET_NODES` or `GET_ROOT_NODE`.
/// Extra parameters are merged into the payload object.
pub fn query(query_type: &str, params: Value) -> Value {
    let mut payload = Map::new();
    payload.insert("@worldmodeltype".into(), json!("RSGQuery"));
    payload.insert("query".into(), json!(query_type));
    merge(&mut payload, params);
    Value::Object(payload)
}

/// A generic world-model update, e.g. `CREATE` or `UPDATE_TRANSFORM`.
/// The parameters must carry a `node` object describing the target.
pub fn update(operation: &str, params: Value) -> Result<Value, SwmClientError> {
    if params.get("node").is_none() {
        return Err(SwmClientError::Decode {
            reason: "update parameters have no `node` object".into(),
        });
    }
    let mut payload = Map::new();
    payload.insert("@worldmodeltype".into(), json!("RSGUpdate"));
    payload.insert("operation".into(), json!(operation));
    merge(&mut payload, params);
    Ok(Value::Object(payload))
}

/// A function-block invocation, e.g. executing a path planner block.
pub fn function_block_call(name: &str, operation: &str, input: Value) -> Value {
    json!({
        "@worldmodeltype": "RSGFunctionBlock",
        "name": name,
        "operation": operation,
        "input": input,
    })
}

/// Query the root node id of the remote scene graph.
pub fn root_node_query() -> Value {
    query("GET_ROOT_NODE", json!({}))
}

/// Query node ids carrying an attribute, e.g. `("name", "observations")`
/// or `("gis:origin", "wgs84")`.
pub fn nodes_by_attribute(key: &str, value: &str) -> Value {
    query("GET_NODES", json!({ "attributes": [attribute(key, value)] }))
}

/// Same as [`nodes_by_attribute`], restricted to one subgraph.
pub fn nodes_by_attribute_in_subgraph(key: &str, value: &str, subgraph_id: &str) -> Value {
    query(
        "GET_NODES",
        json!({
            "subgraphId": subgraph_id,
            "attributes": [attribute(key, value)],
        }),
    )
}

/// An observation node (victim, image, ...) created under the observations
/// group. Returns the payload and the generated node id.
pub fn observation_node(
    observation_type: &str,
    stamp_ms: f64,
    author: &str,
    parent_id: &str,
) -> (Value, String) {
    let node_id = uuid::Uuid::new_v4().to_string();
    let payload = json!({
        "@worldmodeltype": "RSGUpdate",
        "operation": "CREATE",
        "parentId": parent_id,
        "node": {
            "@graphtype": "Node",
            "id": node_id,
            "attributes": [
                attribute("sherpa:observation_type", observation_type),
                attribute("sherpa:stamp", stamp_ms),
                attribute("sherpa:author", author),
            ],
        },
    });
    (payload, node_id)
}

/// A geopose transform connection from the GIS origin to a node, created
/// with one history entry holding a 4x4 homogeneous matrix (column-major
/// rows as nested arrays). Returns the payload and the generated pose id.
pub fn geopose_connection(
    origin_id: &str,
    target_id: &str,
    matrix: &[[f64; 4]; 4],
    stamp_ms: f64,
) -> (Value, String) {
    let pose_id = uuid::Uuid::new_v4().to_string();
    let payload = json!({
        "@worldmodeltype": "RSGUpdate",
        "operation": "CREATE",
        "parentId": origin_id,
        "node": {
            "@graphtype": "Connection",
            "@semanticContext": "Transform",
            "id": pose_id,
            "attributes": [attribute("tf:type", "wgs84")],
            "sourceIds": [origin_id],
            "targetIds": [target_id],
            "history": [transform_entry(matrix, stamp_ms)],
        },
    });
    (payload, pose_id)
}

/// An `UPDATE_TRANSFORM` refreshing an existing geopose connection.
pub fn pose_update(pose_id: &str, matrix: &[[f64; 4]; 4], stamp_ms: f64) -> Value {
    json!({
        "@worldmodeltype": "RSGUpdate",
        "operation": "UPDATE_TRANSFORM",
        "node": {
            "@graphtype": "Connection",
            "@semanticContext": "Transform",
            "id": pose_id,
            "history": [transform_entry(matrix, stamp_ms)],
        },
    })
}

/// A battery status node created under an agent node. Returns the payload
/// and the generated node id.
pub fn battery_node(voltage: f64, status: &str, parent_id: &str) -> (Value, String) {
    let node_id = uuid::Uuid::new_v4().to_string();
    let payload = json!({
        "@worldmodeltype": "RSGUpdate",
        "operation": "CREATE",
        "parentId": parent_id,
        "node": {
            "@graphtype": "Node",
            "id": node_id,
            "attributes": [
                attribute("sherpa:observation_type", "battery"),
                attribute("sherpa:battery_voltage", voltage),
                attribute("sherpa:battery_status", status),
            ],
        },
    });
    (payload, node_id)
}

/// An `UPDATE_ATTRIBUTES` refreshing an existing battery node.
pub fn battery_update(node_id: &str, voltage: f64, status: &str) -> Value {
    json!({
        "@worldmodeltype": "RSGUpdate",
        "operation": "UPDATE_ATTRIBUTES",
        "node": {
            "@graphtype": "Node",
            "id": node_id,
            "attributes": [
                attribute("sherpa:battery_voltage", voltage),
                attribute("sherpa:battery_status", status),
            ],
        },
    })
}

/// The legacy mediator-id query payload. Unlike the other builders this
/// pre-assigns the correlation id, because the mediator family carries it
/// as `UID` rather than `queryId`.
pub fn mediator_uid_payload() -> Value {
    json!({ FIELD_UID: uuid::Uuid::new_v4().to_string() })
}

fn transform_entry(matrix: &[[f64; 4]; 4], stamp_ms: f64) -> Value {
    json!({
        "stamp": {
            "@stamptype": "TimeStampUTCms",
            "stamp": stamp_ms,
        },
        "transform": {
            "type": "HomogeneousMatrix44",
            "matrix": matrix,
            "unit": "latlon",
        },
    })
}

fn merge(payload: &mut Map<String, Value>, params: Value) {
    if let Value::Object(map) = params {
        for (key, value) in map {
            payload.insert(key, value);
        }
    }
}
