//! JSON-RPC 2.0 request/reply envelopes exchanged over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// `{ jsonrpc, id?, method?, params, timeout? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Option<Uuid>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default = "Value::default")]
    pub params: Value,
    #[serde(default)]
    pub timeout: Option<f64>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

impl JsonRpcRequest {
    /// A request synthesized when the inbound payload failed to parse, so the
    /// error path still has a context to report against.
    pub fn empty() -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: Value::Object(Default::default()),
            timeout: Some(60.0),
        }
    }

    /// The id to use for replies: the one carried on the wire, or a freshly
    /// assigned one if absent.
    pub fn id_or_assign(&mut self) -> Uuid {
        if let Some(id) = self.id {
            id
        } else {
            let id = Uuid::new_v4();
            self.id = Some(id);
            id
        }
    }
}

/// One field-level validation failure: `{ type, target?, message }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
}

/// `{ type, errors: [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

/// `{ code, message, timestamp, data? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>, data: Option<ErrorData>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// `{ jsonrpc, id, result?, error? }` — exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcReply {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn ok(id: Uuid, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Uuid, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JsonRpcReply always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_has_sixty_second_timeout() {
        let req = JsonRpcRequest::empty();
        assert_eq!(req.timeout, Some(60.0));
        assert!(req.params.is_object());
    }

    #[test]
    fn id_or_assign_preserves_existing_id() {
        let id = Uuid::new_v4();
        let mut req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: Value::Null,
            timeout: None,
        };
        assert_eq!(req.id_or_assign(), id);
    }

    #[test]
    fn id_or_assign_generates_fresh_uuid_when_absent() {
        let mut req = JsonRpcRequest::empty();
        assert!(req.id.is_none());
        let assigned = req.id_or_assign();
        assert_eq!(req.id, Some(assigned));
    }

    #[test]
    fn reply_round_trips_result() {
        let id = Uuid::new_v4();
        let reply = JsonRpcReply::ok(id, serde_json::json!({"status": "OK"}));
        let bytes = reply.to_bytes();
        let parsed: JsonRpcReply = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.id, id);
        assert!(parsed.error.is_none());
        assert_eq!(parsed.result, Some(serde_json::json!({"status": "OK"})));
    }
}
