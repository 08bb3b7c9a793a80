//! JSON-RPC 2.0 message types exchanged with plugin processes
//!
//! Every message is a single JSON object on its own line. The host only ever
//! sends requests and the plugin only ever sends responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IpcError;

/// JSON-RPC version string carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Methods every external plugin is expected to understand
pub mod methods {
    /// Sent once after launch with the plugin's configuration object
    pub const INITIALIZE: &str = "initialize";
    /// Periodic liveness probe
    pub const HEALTH: &str = "health";
    /// Asks the plugin to exit on its own
    pub const SHUTDOWN: &str = "shutdown";
}

/// Request sent from host to plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to a single newline-terminated line
    pub fn to_line(&self) -> Result<String, IpcError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Error object inside a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response sent from plugin to host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Parse one line of plugin output
    pub fn parse_line(line: &str) -> Result<Self, IpcError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Convert into the call outcome; a missing result is `null`
    pub fn into_result(self) -> Result<Value, IpcError> {
        match self.error {
            Some(err) => Err(IpcError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
