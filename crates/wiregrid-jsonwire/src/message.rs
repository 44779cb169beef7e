//! JSON wire protocol messages.
//!
//! Only the parts of the protocol the grid needs are modelled: the generic
//! response envelope, the session list, and new-session classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generic response envelope: `{"sessionId": .., "status": 0, "value": ..}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub value: Value,
}

impl Message {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    /// Human-readable error carried in `value`, if any.
    pub fn error_message(&self) -> String {
        match &self.value {
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.value.to_string()),
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One entry of a session list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub capabilities: Value,
}

/// Response of `GET /sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sessions {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub value: Vec<SessionEntry>,
}

/// Session id of a new-session response body, or `None` when the body is
/// not a well-formed successful session object.
///
/// Two dialects are accepted:
///
/// - legacy: `{"status": 0, "sessionId": "..", "value": {..}}`
/// - W3C: `{"value": {"sessionId": "..", "capabilities": {..}}}`
///
/// A non-zero `status` or a `value.error` is always a failure, whatever
/// the HTTP status code was.
pub fn created_session_id(body: &[u8]) -> Option<String> {
    let Ok(Value::Object(root)) = serde_json::from_slice::<Value>(body) else {
        return None;
    };

    let status = match root.get("status") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_i64()?),
    };
    if status.is_some_and(|s| s != 0) {
        return None;
    }

    let value = root.get("value");
    if let Some(Value::Object(v)) = value {
        if v.contains_key("error") {
            return None;
        }
    }

    if status == Some(0) {
        if let Some(id) = non_empty_str(root.get("sessionId")) {
            return Some(id);
        }
    }

    match value {
        Some(Value::Object(v)) => non_empty_str(v.get("sessionId")),
        _ => None,
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
