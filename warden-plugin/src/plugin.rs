//! Core plugin trait and context definitions

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{PluginError, PluginResult};
use crate::logs::PluginLogBuffer;
use crate::manifest::PluginManifest;
use crate::types::HealthStatus;

/// Everything a plugin receives when it is initialized
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// ID of the plugin being initialized
    pub plugin_id: String,
    /// Plugin configuration object
    pub config: Value,
    /// Deadline for the initialize handshake of external plugins
    pub init_timeout: Duration,
    /// Log buffer owned by the registry record
    pub logs: Arc<PluginLogBuffer>,
    /// Cancelled when the host shuts down
    pub cancel: CancellationToken,
}

impl PluginContext {
    pub fn new(plugin_id: impl Into<String>, config: Value) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            config,
            init_timeout: Duration::from_secs(30),
            logs: Arc::new(PluginLogBuffer::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Get plugin configuration as a specific type
    pub fn config_as<T>(&self) -> PluginResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        serde_json::from_value(self.config.clone()).map_err(PluginError::from)
    }
}

/// Core plugin trait implemented by builtin and external adapters
///
/// Methods take `&self` so the registry can hand out `Arc<dyn Plugin>`
/// handles and call them without holding its lock.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Manifest the plugin was registered with
    fn manifest(&self) -> &PluginManifest;

    /// Prepare the plugin; for external plugins this launches the process
    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()>;

    /// Begin normal operation
    async fn start(&self) -> PluginResult<()>;

    /// Stop the plugin and release its resources
    async fn stop(&self) -> PluginResult<()>;

    /// Current health; never fails
    async fn health(&self) -> HealthStatus;

    /// Invoke a plugin method
    async fn call(&self, method: &str, params: Value) -> PluginResult<Value> {
        let _ = params;
        Err(PluginError::generic(format!(
            "Plugin '{}' does not handle method '{}'",
            self.manifest().id,
            method
        )))
    }

    fn id(&self) -> &str {
        &self.manifest().id
    }

    /// OS process ID, for plugins backed by a child process
    fn pid(&self) -> Option<u32> {
        None
    }
}
