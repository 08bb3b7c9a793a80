//! Adapter for plugins running as child processes

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use warden_ipc::{methods, LaunchSpec, LogSink, PluginProcess};

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use crate::plugin::{Plugin, PluginContext};
use crate::types::{HealthState, HealthStatus};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HealthReply {
    state: HealthState,
    #[serde(default)]
    message: String,
}

/// An external plugin. Each `initialize` launches a fresh process.
pub struct ExternalPlugin {
    manifest: PluginManifest,
    launch: LaunchSpec,
    stop_grace: Duration,
    health_timeout: Duration,
    call_timeout: Duration,
    process: Mutex<Option<Arc<PluginProcess>>>,
}

impl ExternalPlugin {
    pub fn new(manifest: PluginManifest, launch: LaunchSpec) -> Self {
        Self {
            manifest,
            launch,
            stop_grace: DEFAULT_STOP_GRACE,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            process: Mutex::new(None),
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    fn current_process(&self) -> Option<Arc<PluginProcess>> {
        self.process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_process(&self) -> Option<Arc<PluginProcess>> {
        self.process.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn running_process(&self) -> Option<Arc<PluginProcess>> {
        self.current_process().filter(|p| p.is_running())
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
        if let Some(stale) = self.take_process() {
            debug!(target: "plugin_external", plugin_id = %self.manifest.id, "Stopping stale process before relaunch");
            let _ = stale.stop(self.stop_grace).await;
        }

        let sink: Arc<dyn LogSink> = ctx.logs.clone();
        let process = PluginProcess::spawn(&self.launch, Some(sink))
            .map(Arc::new)
            .map_err(|e| PluginError::initialization_failed(&self.manifest.id, e.to_string()))?;

        *self.process.lock().unwrap_or_else(|e| e.into_inner()) = Some(process.clone());

        if let Err(e) = process
            .call(methods::INITIALIZE, ctx.config.clone(), ctx.init_timeout)
            .await
        {
            warn!(
                target: "plugin_external",
                plugin_id = %self.manifest.id,
                error = %e,
                "Plugin initialize handshake failed"
            );
            self.take_process();
            let _ = process.stop(self.stop_grace).await;
            return Err(PluginError::initialization_failed(
                &self.manifest.id,
                e.to_string(),
            ));
        }

        Ok(())
    }

    async fn start(&self) -> PluginResult<()> {
        match self.running_process() {
            Some(_) => Ok(()),
            None => Err(PluginError::start_failed(
                &self.manifest.id,
                "Plugin process not running",
            )),
        }
    }

    async fn stop(&self) -> PluginResult<()> {
        match self.take_process() {
            Some(process) => process.stop(self.stop_grace).await.map_err(PluginError::from),
            None => Ok(()),
        }
    }

    async fn health(&self) -> HealthStatus {
        let Some(process) = self.running_process() else {
            return HealthStatus::unhealthy("Plugin process not running");
        };

        match process
            .call(methods::HEALTH, Value::Null, self.health_timeout)
            .await
        {
            Ok(value) => match serde_json::from_value::<HealthReply>(value) {
                Ok(reply) => HealthStatus::new(reply.state, reply.message),
                Err(_) => HealthStatus::healthy("Plugin running"),
            },
            Err(e) => HealthStatus::unhealthy(format!("Health check failed: {}", e)),
        }
    }

    async fn call(&self, method: &str, params: Value) -> PluginResult<Value> {
        let process = self.current_process().ok_or(warden_ipc::IpcError::NotRunning)?;
        Ok(process.call(method, params, self.call_timeout).await?)
    }

    fn pid(&self) -> Option<u32> {
        self.running_process().and_then(|p| p.pid())
    }
}
