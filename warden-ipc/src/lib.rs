//! Inter-process communication for Warden
//!
//! This crate provides the JSON-RPC envelopes and the child-process transport
//! used between the plugin host and external plugin processes.

pub mod error;
pub mod process;
pub mod protocol;

// Re-export commonly used types
pub use error::{IpcError, IpcResult};
pub use process::{LaunchSpec, LogSink, PluginProcess, PLUGIN_PATH_ENV};
pub use protocol::{methods, RpcErrorObject, RpcRequest, RpcResponse, JSONRPC_VERSION};
