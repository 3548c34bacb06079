use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response status: call succeeded.
pub const STATUS_OK: &str = "OK";
/// Response status: call failed.
pub const STATUS_ERROR: &str = "ERROR";
/// Reason attached to calls force-resolved by `disconnect` without a reason.
pub const DEFAULT_DISCONNECT_REASON: &str = "connection timeout";

/// Outbound RPC message.
///
/// Only `rpcName` and `requestId` matter to relaylink; the rest is carried
/// through untouched for the remote handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_identifier: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RpcRequest {
    /// Create a request for `rpc_name` with no correlation id yet.
    pub fn new(rpc_name: impl Into<String>) -> Self {
        Self {
            rpc_name: Some(rpc_name.into()),
            ..Self::default()
        }
    }

    /// Set an explicit correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a request body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Synthetic failure delivered to calls that never got a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: String,
    pub reason: String,
}

impl ErrorResponse {
    /// Create an error response, falling back to the default disconnect reason.
    pub fn new(reason: Option<&str>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            reason: reason.unwrap_or(DEFAULT_DISCONNECT_REASON).to_string(),
        }
    }

    /// Render as the JSON value handed to resolvers.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "status": self.status, "reason": self.reason })
    }
}

/// Whether a response payload reports `status: "ERROR"`.
pub fn is_error_response(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some(STATUS_ERROR)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_serializes_camel_case_and_skips_empty_fields() {
        let request = RpcRequest::new("GetUserInfo").with_request_id("abc");
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({ "rpcName": "GetUserInfo", "requestId": "abc" }));
    }

    #[test]
    fn request_preserves_unknown_fields() {
        let request: RpcRequest = serde_json::from_value(json!({
            "rpcName": "PayInvoice",
            "query": { "limit": 5 },
            "appId": "app-1",
        }))
        .unwrap();
        assert_eq!(request.rpc_name.as_deref(), Some("PayInvoice"));
        assert!(request.request_id.is_none());
        assert_eq!(request.extra["appId"], "app-1");

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["query"]["limit"], 5);
    }

    #[test]
    fn error_response_defaults_reason() {
        let value = ErrorResponse::new(None).to_value();
        assert_eq!(value, json!({ "status": "ERROR", "reason": "connection timeout" }));
        assert!(is_error_response(&value));
        assert!(!is_error_response(&json!({ "status": "OK" })));
    }
}
