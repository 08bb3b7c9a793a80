//! Plugin host: startup scheduling, lifecycle operations and hot-reload
//!
//! [`PluginHost`] is cheap to clone; clones share one registry. Startup runs
//! level by level from the dependency graph, launching each level
//! concurrently and aborting if a critical plugin fails. Shutdown walks the
//! startup order backwards, one plugin at a time.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_config::HostConfig;

use crate::bus::{publish_error, publish_started, publish_stopped, EventBus};
use crate::discovery::PluginDiscovery;
use crate::error::{PluginError, PluginResult};
use crate::external::ExternalPlugin;
use crate::graph::{build_startup_order, group_by_dependency_level};
use crate::health::HealthMonitor;
use crate::logs::{LogEntry, PluginLogBuffer};
use crate::plugin::{Plugin, PluginContext};
use crate::registry::{
    LoadedPlugin, PluginInfo, PluginRegistry, StartDecision, UnregisterDecision,
};
use crate::types::PluginState;

const RESTART_PAUSE: Duration = Duration::from_millis(100);

struct HostInner {
    config: HostConfig,
    registry: Arc<PluginRegistry>,
    bus: Arc<dyn EventBus>,
    discovery: PluginDiscovery,
    plugin_configs: RwLock<HashMap<String, Value>>,
    startup_order: RwLock<Vec<String>>,
    cancel: std::sync::Mutex<CancellationToken>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the plugin registry and drives every lifecycle operation
#[derive(Clone)]
pub struct PluginHost {
    inner: Arc<HostInner>,
}

impl PluginHost {
    pub fn new(config: HostConfig, bus: Arc<dyn EventBus>) -> Self {
        Self::with_discovery(config, bus, PluginDiscovery::new())
    }

    pub fn with_discovery(
        config: HostConfig,
        bus: Arc<dyn EventBus>,
        discovery: PluginDiscovery,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                registry: Arc::new(PluginRegistry::new()),
                bus,
                discovery,
                plugin_configs: RwLock::new(HashMap::new()),
                startup_order: RwLock::new(Vec::new()),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
                health_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.inner.registry.clone()
    }

    /// Current host token, replaced with a fresh one once cancelled
    fn cancel_token(&self) -> CancellationToken {
        let mut token = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn new_log_buffer(&self) -> Arc<PluginLogBuffer> {
        Arc::new(PluginLogBuffer::new(self.inner.config.log_buffer_size))
    }

    /// Register a plugin implemented in-process
    pub async fn register_builtin(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        plugin.manifest().validate()?;
        let record = LoadedPlugin::builtin(plugin, self.new_log_buffer());
        info!(target: "plugin_host", plugin_id = %record.manifest.id, "Registering builtin plugin");
        self.inner.registry.register(record).await
    }

    /// Register every launchable package in the plugins directory.
    ///
    /// IDs that are already registered are left untouched. Returns the number
    /// of newly registered plugins.
    pub async fn scan_external_plugins(&self) -> PluginResult<usize> {
        let config = &self.inner.config;
        let mut registered = 0;

        for package in self.inner.discovery.scan(&config.plugins_dir) {
            let id = package.manifest.id.clone();
            if self.inner.registry.contains(&id).await {
                debug!(target: "plugin_host", plugin_id = %id, "Plugin already registered, skipping");
                continue;
            }

            let launch = match self.inner.discovery.resolve(&package).await {
                Ok(Some(launch)) => launch,
                Ok(None) => continue,
                Err(e) => {
                    warn!(target: "plugin_host", plugin_id = %id, error = %e, "Skipping plugin");
                    continue;
                }
            };

            let plugin = ExternalPlugin::new(package.manifest, launch.spec)
                .with_stop_grace(config.stop_grace_period)
                .with_health_timeout(config.health_check_timeout);
            let record = LoadedPlugin::external(
                Arc::new(plugin),
                launch.binary_path,
                package.dir,
                self.new_log_buffer(),
            );

            match self.inner.registry.register(record).await {
                Ok(()) => {
                    info!(target: "plugin_host", plugin_id = %id, "Discovered external plugin");
                    registered += 1;
                }
                Err(PluginError::PluginAlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(registered)
    }

    /// Discover plugins and start everything in dependency order
    pub async fn start(&self) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.inner.config.plugins_dir).await?;

        let discovered = self.scan_external_plugins().await?;
        let manifests = self.inner.registry.manifests().await;
        info!(
            target: "plugin_host",
            total = manifests.len(),
            discovered,
            "Starting plugin host"
        );

        let order = build_startup_order(&manifests)?;
        *self.inner.startup_order.write().await = order.clone();
        let levels = group_by_dependency_level(&order, &manifests);

        for (index, level) in levels.iter().enumerate() {
            debug!(target: "plugin_host", level = index, plugins = ?level, "Starting level");
            self.start_level(level).await?;
        }

        let token = self.cancel_token().child_token();
        let task = self
            .health_monitor()
            .spawn(self.inner.config.health_check_interval, token);
        if let Some(previous) = self.inner.health_task.lock().await.replace(task) {
            previous.abort();
        }

        info!(target: "plugin_host", plugins = order.len(), "Plugin host started");
        Ok(())
    }

    async fn start_level(&self, level: &[String]) -> PluginResult<()> {
        let mut set = JoinSet::new();
        for id in level {
            let host = self.clone();
            let id = id.clone();
            set.spawn(async move {
                let result = host.start_plugin(&id).await;
                (id, result)
            });
        }

        let mut results: HashMap<String, PluginResult<()>> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => error!(target: "plugin_host", error = %e, "Plugin start task failed"),
            }
        }

        for id in level {
            let result = match results.remove(id) {
                Some(result) => result,
                None => {
                    let reason = "start task panicked";
                    self.inner.registry.mark_failed(id, reason).await;
                    publish_error(self.inner.bus.as_ref(), id, reason);
                    Err(PluginError::start_failed(id, reason))
                }
            };

            if let Err(e) = result {
                if self.is_critical(id).await {
                    error!(target: "plugin_host", plugin_id = %id, error = %e, "Critical plugin failed to start");
                    return Err(PluginError::CriticalPluginFailed {
                        name: id.clone(),
                        reason: e.to_string(),
                    });
                }
                warn!(target: "plugin_host", plugin_id = %id, error = %e, "Plugin failed to start, continuing");
            }
        }

        Ok(())
    }

    /// Stop the health monitor, then every plugin in reverse startup order.
    ///
    /// Errors are logged, never returned.
    pub async fn stop(&self) -> PluginResult<()> {
        info!(target: "plugin_host", "Stopping plugin host");
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();

        let health_task = self.inner.health_task.lock().await.take();
        if let Some(task) = health_task {
            if let Err(e) = task.await {
                debug!(target: "plugin_host", error = %e, "Health monitor task ended abnormally");
            }
        }

        let order = self.startup_order().await;
        let in_order: HashSet<&str> = order.iter().map(String::as_str).collect();

        // Plugins started after host startup are not in the order; stop them first
        let extra: Vec<String> = self
            .inner
            .registry
            .list()
            .await
            .into_iter()
            .filter(|info| info.state.can_stop() && !in_order.contains(info.id.as_str()))
            .map(|info| info.id)
            .collect();

        for id in extra.iter().chain(order.iter().rev()) {
            if !self.inner.registry.contains(id).await {
                continue;
            }
            if let Err(e) = self.stop_plugin(id).await {
                warn!(target: "plugin_host", plugin_id = %id, error = %e, "Failed to stop plugin");
            }
        }

        info!(target: "plugin_host", "Plugin host stopped");
        Ok(())
    }

    /// Start one plugin. Starting a running plugin is a no-op.
    pub async fn start_plugin(&self, id: &str) -> PluginResult<()> {
        let handle = match self.inner.registry.begin_start(id).await? {
            StartDecision::AlreadyRunning => {
                debug!(target: "plugin_host", plugin_id = %id, "Plugin already running");
                return Ok(());
            }
            StartDecision::Begin(handle) => handle,
        };

        let init_timeout = self.inner.config.init_timeout;
        let ctx = PluginContext {
            plugin_id: id.to_string(),
            config: self.plugin_config(id).await,
            init_timeout,
            logs: handle.logs.clone(),
            cancel: self.cancel_token(),
        };
        let cancel = ctx.cancel.clone();
        let plugin = handle.plugin.clone();

        info!(target: "plugin_host", plugin_id = %id, builtin = handle.is_builtin, "Starting plugin");
        let launch = async {
            plugin.initialize(&ctx).await?;
            plugin.start().await
        };

        let result = if handle.is_builtin {
            tokio::select! {
                result = launch => result,
                _ = cancel.cancelled() => Err(PluginError::start_failed(id, "host is shutting down")),
            }
        } else {
            tokio::select! {
                result = tokio::time::timeout(init_timeout, launch) => result.unwrap_or_else(|_| {
                    Err(PluginError::start_failed(
                        id,
                        format!("timed out after {}s", init_timeout.as_secs_f64()),
                    ))
                }),
                _ = cancel.cancelled() => Err(PluginError::start_failed(id, "host is shutting down")),
            }
        };

        match result {
            Ok(()) => {
                self.inner.registry.mark_running(id).await;
                info!(target: "plugin_host", plugin_id = %id, version = %handle.version, "Plugin started");
                publish_started(self.inner.bus.as_ref(), id, &handle.version);
                Ok(())
            }
            Err(e) => {
                if !handle.is_builtin {
                    // Do not leave a half-launched process behind
                    if let Err(stop_err) = plugin.stop().await {
                        debug!(target: "plugin_host", plugin_id = %id, error = %stop_err, "Cleanup after failed start");
                    }
                }
                let message = e.to_string();
                self.inner.registry.mark_failed(id, &message).await;
                error!(target: "plugin_host", plugin_id = %id, error = %message, "Plugin failed to start");
                publish_error(self.inner.bus.as_ref(), id, &message);
                Err(e)
            }
        }
    }

    /// Stop one plugin. Stopping a stopped plugin is a no-op.
    pub async fn stop_plugin(&self, id: &str) -> PluginResult<()> {
        let Some(plugin) = self.inner.registry.begin_stop(id).await? else {
            return Ok(());
        };
        self.finish_stop(id, plugin, self.inner.config.stop_timeout)
            .await;
        Ok(())
    }

    async fn finish_stop(&self, id: &str, plugin: Arc<dyn Plugin>, timeout: Duration) {
        info!(target: "plugin_host", plugin_id = %id, "Stopping plugin");
        match tokio::time::timeout(timeout, plugin.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(target: "plugin_host", plugin_id = %id, error = %e, "Plugin stop reported an error")
            }
            Err(_) => warn!(
                target: "plugin_host",
                plugin_id = %id,
                timeout_secs = timeout.as_secs_f64(),
                "Plugin stop timed out"
            ),
        }

        self.inner.registry.mark_stopped(id).await;
        publish_stopped(self.inner.bus.as_ref(), id);
    }

    /// Stop, pause briefly, then start again
    pub async fn restart(&self, id: &str) -> PluginResult<()> {
        self.stop_plugin(id).await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start_plugin(id).await
    }

    pub async fn enable(&self, id: &str) -> PluginResult<()> {
        if !self.inner.registry.contains(id).await {
            return Err(PluginError::not_found(id));
        }
        self.start_plugin(id).await
    }

    pub async fn disable(&self, id: &str) -> PluginResult<()> {
        if !self.inner.registry.contains(id).await {
            return Err(PluginError::not_found(id));
        }
        if self.is_critical(id).await {
            return Err(PluginError::CannotDisableCritical {
                name: id.to_string(),
            });
        }
        self.stop_plugin(id).await
    }

    /// Reload a plugin from disk and start it.
    ///
    /// A running external plugin is stopped and dropped first so the rescan
    /// registers it afresh. A running builtin is only restarted.
    pub async fn scan_and_start(&self, id: &str) -> PluginResult<()> {
        if let Some(info) = self.inner.registry.get_info(id).await {
            if info.state == PluginState::Running {
                if info.is_builtin {
                    return self.restart(id).await;
                }
                self.stop_plugin(id).await?;
                self.inner.registry.remove(id).await;
            }
        }

        self.scan_external_plugins().await?;
        if !self.inner.registry.contains(id).await {
            return Err(PluginError::not_found(id));
        }
        self.start_plugin(id).await
    }

    /// Remove a plugin record. Unknown IDs are ignored.
    pub async fn unregister(&self, id: &str, force: bool) -> PluginResult<()> {
        match self.inner.registry.check_unregister(id, force).await? {
            UnregisterDecision::NotRegistered => {
                debug!(target: "plugin_host", plugin_id = %id, "Plugin not registered");
            }
            UnregisterDecision::Removed => {
                info!(target: "plugin_host", plugin_id = %id, "Plugin unregistered");
            }
            UnregisterDecision::StopFirst(plugin) => {
                warn!(target: "plugin_host", plugin_id = %id, "Force-stopping plugin before unregistering");
                self.finish_stop(id, plugin, self.inner.config.force_stop_timeout)
                    .await;
                self.inner.registry.remove(id).await;
                info!(target: "plugin_host", plugin_id = %id, "Plugin unregistered");
            }
        }
        Ok(())
    }

    pub async fn set_plugin_config(&self, id: impl Into<String>, config: Value) {
        self.inner.plugin_configs.write().await.insert(id.into(), config);
    }

    /// Configuration passed to `initialize`, `{}` when none was set
    pub async fn plugin_config(&self, id: &str) -> Value {
        self.inner
            .plugin_configs
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    pub async fn get(&self, id: &str) -> Option<PluginInfo> {
        self.inner.registry.get_info(id).await
    }

    pub async fn list(&self) -> Vec<PluginInfo> {
        self.inner.registry.list().await
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.inner.registry.is_running(id).await
    }

    /// The last `n` log lines captured for a plugin
    pub async fn plugin_logs(&self, id: &str, n: usize) -> PluginResult<Vec<LogEntry>> {
        self.inner
            .registry
            .logs(id)
            .await
            .map(|logs| logs.recent(n))
            .ok_or_else(|| PluginError::not_found(id))
    }

    pub async fn startup_order(&self) -> Vec<String> {
        self.inner.startup_order.read().await.clone()
    }

    /// Critical if listed in the host config or flagged in the manifest
    pub async fn is_critical(&self, id: &str) -> bool {
        if self.inner.config.critical_plugins.iter().any(|c| c == id) {
            return true;
        }
        self.inner
            .registry
            .get_info(id)
            .await
            .map(|info| info.critical)
            .unwrap_or(false)
    }

    /// Handle for routing calls to a running plugin
    pub async fn caller(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        if self.inner.registry.is_running(id).await {
            self.inner.registry.handle(id).await
        } else {
            None
        }
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.inner.registry.clone(),
            self.inner.bus.clone(),
            self.inner.config.health_check_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{BuiltinPlugin, PluginService};
    use crate::bus::NoopBus;
    use crate::manifest::PluginManifest;

    struct Idle;

    impl PluginService for Idle {}

    fn host(dir: &std::path::Path) -> PluginHost {
        let config = HostConfig {
            plugins_dir: dir.to_path_buf(),
            critical_plugins: vec!["listed".to_string()],
            ..HostConfig::default()
        };
        PluginHost::new(config, Arc::new(NoopBus))
    }

    async fn add(host: &PluginHost, manifest: PluginManifest) {
        host.register_builtin(Arc::new(BuiltinPlugin::new(manifest, Idle)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_is_critical_from_config_or_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        add(&host, PluginManifest::new("listed", "1.0.0")).await;
        add(&host, PluginManifest::new("flagged", "1.0.0").with_critical(true)).await;
        add(&host, PluginManifest::new("plain", "1.0.0")).await;

        assert!(host.is_critical("listed").await);
        assert!(host.is_critical("flagged").await);
        assert!(!host.is_critical("plain").await);
        assert!(!host.is_critical("unknown").await);
    }

    #[tokio::test]
    async fn test_plugin_config_defaults_to_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        assert_eq!(host.plugin_config("x").await, serde_json::json!({}));

        host.set_plugin_config("x", serde_json::json!({"port": 8080}))
            .await;
        assert_eq!(host.plugin_config("x").await["port"], 8080);
    }

    #[tokio::test]
    async fn test_register_builtin_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        add(&host, PluginManifest::new("core", "1.0.0")).await;

        let duplicate = Arc::new(BuiltinPlugin::new(PluginManifest::new("core", "2.0.0"), Idle));
        assert!(matches!(
            host.register_builtin(duplicate).await,
            Err(PluginError::PluginAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_creates_plugins_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plugins_dir = dir.path().join("plugins");
        let host = host(&plugins_dir);
        add(&host, PluginManifest::new("core", "1.0.0")).await;

        host.start().await.unwrap();
        assert!(plugins_dir.is_dir());
        assert!(host.is_running("core").await);
        assert!(host.caller("core").await.is_some());

        host.stop().await.unwrap();
        assert!(!host.is_running("core").await);
        assert!(host.caller("core").await.is_none());
    }

    #[tokio::test]
    async fn test_disable_and_logs_of_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        assert!(matches!(
            host.disable("ghost").await,
            Err(PluginError::PluginNotFound { .. })
        ));
        assert!(matches!(
            host.plugin_logs("ghost", 10).await,
            Err(PluginError::PluginNotFound { .. })
        ));
        assert!(host.unregister("ghost", false).await.is_ok());
    }
}
