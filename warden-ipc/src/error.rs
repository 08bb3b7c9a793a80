//! IPC error types

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// IPC result type
pub type IpcResult<T> = Result<T, IpcError>;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error on the child's pipes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout waiting for response
    #[error("Timeout after {timeout:?} waiting for '{method}' response")]
    Timeout { method: String, timeout: Duration },

    /// The plugin answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Process is not running
    #[error("Plugin process not running")]
    NotRunning,

    /// Process exited while a request was outstanding
    #[error("Plugin process exited")]
    ProcessExited,

    /// Failed to launch the child process
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A piped stdio stream was not available after spawn
    #[error("Child {0} unavailable")]
    StreamUnavailable(&'static str),
}

impl IpcError {
    /// Check if this error is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, IpcError::Timeout { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::Io(_) | IpcError::Timeout { .. })
    }
}
