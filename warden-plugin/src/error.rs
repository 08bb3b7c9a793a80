//! Plugin system error types

use thiserror::Error;
use warden_ipc::IpcError;

use crate::bus::BusError;
use crate::types::PluginState;

/// Plugin system result type
pub type PluginResult<T> = Result<T, PluginError>;

/// Plugin system errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// Plugin not found
    #[error("Plugin '{name}' not found")]
    PluginNotFound { name: String },

    /// Plugin already exists
    #[error("Plugin '{name}' already exists")]
    PluginAlreadyExists { name: String },

    /// Invalid plugin manifest
    #[error("Invalid plugin manifest: {reason}")]
    InvalidManifest { reason: String },

    /// Dependency graph contains a cycle
    #[error("Circular dependency detected involving plugins: {}", plugins.join(", "))]
    CircularDependency { plugins: Vec<String> },

    /// Plugin initialization failed
    #[error("Plugin '{name}' initialization failed: {reason}")]
    InitializationFailed { name: String, reason: String },

    /// Plugin start failed
    #[error("Plugin '{name}' failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// A critical plugin failed and host startup was aborted
    #[error("Critical plugin '{name}' failed to start: {reason}")]
    CriticalPluginFailed { name: String, reason: String },

    /// Builtin plugins are registered in code and cannot be removed
    #[error("Cannot unregister builtin plugin '{name}'")]
    CannotUnregisterBuiltin { name: String },

    /// Plugin must be stopped before it can be removed
    #[error("Plugin '{name}' is still {state}, stop it first")]
    PluginStillRunning { name: String, state: PluginState },

    /// Critical plugins cannot be disabled
    #[error("Cannot disable critical plugin '{name}'")]
    CannotDisableCritical { name: String },

    /// Requested lifecycle change is not allowed from the current state
    #[error("Plugin '{name}' cannot {action} while {state}")]
    InvalidStateTransition {
        name: String,
        state: PluginState,
        action: &'static str,
    },

    /// No launchable executable in the plugin directory
    #[error("No executable found for plugin '{name}' in {dir}")]
    BinaryNotFound { name: String, dir: String },

    /// Transport error
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML manifest parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event bus error
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Generic error
    #[error("Plugin system error: {0}")]
    Generic(String),
}

impl PluginError {
    /// Create a new generic plugin error
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }

    /// Create a new plugin not found error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::PluginNotFound { name: name.into() }
    }

    /// Create a new initialization failed error
    pub fn initialization_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new start failed error
    pub fn start_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid manifest error
    pub fn invalid_manifest(reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_plugins() {
        let err = PluginError::CircularDependency {
            plugins: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected involving plugins: a, b"
        );
    }

    #[test]
    fn test_state_in_message() {
        let err = PluginError::PluginStillRunning {
            name: "camera".to_string(),
            state: PluginState::Running,
        };
        assert_eq!(err.to_string(), "Plugin 'camera' is still running, stop it first");

        let err = PluginError::InvalidStateTransition {
            name: "camera".to_string(),
            state: PluginState::Stopping,
            action: "start",
        };
        assert_eq!(err.to_string(), "Plugin 'camera' cannot start while stopping");
    }

    #[test]
    fn test_ipc_conversion() {
        let err: PluginError = IpcError::NotRunning.into();
        assert!(matches!(err, PluginError::Ipc(IpcError::NotRunning)));
    }
}
