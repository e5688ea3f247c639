//! JSON-RPC 2.0 envelope types

use coe_core::CoeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// A validated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Validate an already-parsed payload
    ///
    /// Checks the version tag first, then the payload shape and method.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcError::InvalidVersion);
        }
        let Value::Object(mut object) = value else {
            return Err(RpcError::InvalidRequest);
        };
        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(RpcError::InvalidRequest),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params: object.remove("params"),
            id: object.remove("id"),
        })
    }
}

/// Error member of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseOutcome {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(JsonRpcError),
}

/// A response; `id` is `null` when the request had none or could not be parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.unwrap_or(Value::Null),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.unwrap_or(Value::Null),
            outcome: ResponseOutcome::Error(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn from_rpc_error(id: Option<Value>, error: RpcError) -> Self {
        let mut response = Self::error(id, error.code(), error.to_string());
        if let (ResponseOutcome::Error(body), RpcError::Parse(detail)) =
            (&mut response.outcome, &error)
        {
            body.data = Some(Value::String(detail.clone()));
        }
        response
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ResponseOutcome::Result(value) => Some(value),
            ResponseOutcome::Error(_) => None,
        }
    }

    pub fn error_body(&self) -> Option<&JsonRpcError> {
        match &self.outcome {
            ResponseOutcome::Error(error) => Some(error),
            ResponseOutcome::Result(_) => None,
        }
    }
}

/// Protocol-level failure, mapped one-to-one onto an error code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Payload is not JSON; carries the parser message
    #[error("Parse error")]
    Parse(String),

    #[error("Invalid JSON-RPC version")]
    InvalidVersion,

    #[error("Invalid Request")]
    InvalidRequest,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidVersion | Self::InvalidRequest => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::InvalidParams(format!("Missing required field: {}", field))
    }
}

/// Caller mistakes become invalid params; everything else is internal
impl From<CoeError> for RpcError {
    fn from(err: CoeError) -> Self {
        match err {
            CoeError::TaskNotFound(_)
            | CoeError::InvalidArgument(_)
            | CoeError::InvalidTransition(_) => Self::InvalidParams(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_result_is_serialized() {
        let response = JsonRpcResponse::success(Some(json!(1)), Value::Null);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": null})
        );
    }

    #[test]
    fn test_error_shape_and_null_id() {
        let response =
            JsonRpcResponse::from_rpc_error(None, RpcError::MethodNotFound("nope".into()));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32601, "message": "Method not found: nope"}
            })
        );
    }

    #[test]
    fn test_response_round_trips_through_json() {
        let text = r#"{"jsonrpc":"2.0","id":"a","error":{"code":-32602,"message":"x"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(text).unwrap();
        assert_eq!(response.id, json!("a"));
        assert_eq!(response.error_body().unwrap().code, INVALID_PARAMS);
        assert!(response.result().is_none());
    }

    #[test]
    fn test_request_validation_order() {
        assert_eq!(
            JsonRpcRequest::from_value(json!({"jsonrpc": "1.0", "method": "x"})),
            Err(RpcError::InvalidVersion)
        );
        assert_eq!(
            JsonRpcRequest::from_value(json!([1, 2])),
            Err(RpcError::InvalidVersion)
        );
        assert_eq!(
            JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "method": 7})),
            Err(RpcError::InvalidRequest)
        );

        let request =
            JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "getNextTask"}))
                .unwrap();
        assert_eq!(request.method, "getNextTask");
        assert!(request.id.is_none());
        assert!(request.params.is_none());
    }

    #[test]
    fn test_coe_error_mapping() {
        let not_found: RpcError = CoeError::TaskNotFound("T9".into()).into();
        assert_eq!(not_found.code(), INVALID_PARAMS);

        let agent: RpcError = CoeError::Agent("quota".into()).into();
        assert_eq!(agent.code(), INTERNAL_ERROR);
        assert_eq!(agent.to_string(), "Internal error: Agent error: quota");
    }
}
