//! Subscription wire protocol (requests, responses, event frames).

use crate::message::MessageRecord;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Params for WS methods "join" and "leave".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParams {
    pub address: String,
}

/// Sent to every client on graceful shutdown.
pub const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// `message.new` event: one live message for a room the client joined.
pub fn new_message_event(address: &str, record: &MessageRecord) -> String {
    serde_json::to_string(&json!({
        "type": "event",
        "event": "message.new",
        "payload": { "address": address, "message": record }
    }))
    .unwrap_or_else(|_| r#"{"type":"event","event":"message.new","payload":{}}"#.to_string())
}

/// `message.history` event: the one-time replay pushed after a join,
/// most-recent-first, possibly empty.
pub fn history_event(address: &str, records: &[MessageRecord]) -> String {
    serde_json::to_string(&json!({
        "type": "event",
        "event": "message.history",
        "payload": { "address": address, "messages": records }
    }))
    .unwrap_or_else(|_| r#"{"type":"event","event":"message.history","payload":{}}"#.to_string())
}

/// `error` event: pushed to a single connection when processing one of its
/// requests fails after the response was already decided.
pub fn error_event(reason: &str) -> String {
    serde_json::to_string(&json!({
        "type": "event",
        "event": "error",
        "payload": { "reason": reason }
    }))
    .unwrap_or_else(|_| r#"{"type":"event","event":"error","payload":{}}"#.to_string())
}
