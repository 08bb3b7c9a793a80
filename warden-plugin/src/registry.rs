//! Plugin registry and lifecycle state machine
//!
//! The registry owns one [`LoadedPlugin`] record per ID behind a single
//! `RwLock`. Lifecycle methods only flip state and hand back plugin handles;
//! the slow plugin calls happen in the host with no guard held, and the result
//! is committed with a second short write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{PluginError, PluginResult};
use crate::logs::PluginLogBuffer;
use crate::manifest::PluginManifest;
use crate::plugin::Plugin;
use crate::types::{PluginState, RuntimeKind};

/// Registry record for one plugin
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    pub plugin: Arc<dyn Plugin>,
    pub state: PluginState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_builtin: bool,
    pub binary_path: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub logs: Arc<PluginLogBuffer>,
}

impl LoadedPlugin {
    /// Record for a plugin compiled into the host
    pub fn builtin(plugin: Arc<dyn Plugin>, logs: Arc<PluginLogBuffer>) -> Self {
        Self {
            manifest: plugin.manifest().clone(),
            plugin,
            state: PluginState::Stopped,
            started_at: None,
            last_error: None,
            is_builtin: true,
            binary_path: None,
            plugin_dir: None,
            logs,
        }
    }

    /// Record for a plugin launched from a directory
    pub fn external(
        plugin: Arc<dyn Plugin>,
        binary_path: PathBuf,
        plugin_dir: PathBuf,
        logs: Arc<PluginLogBuffer>,
    ) -> Self {
        Self {
            manifest: plugin.manifest().clone(),
            plugin,
            state: PluginState::Stopped,
            started_at: None,
            last_error: None,
            is_builtin: false,
            binary_path: Some(binary_path),
            plugin_dir: Some(plugin_dir),
            logs,
        }
    }

    pub fn info(&self) -> PluginInfo {
        let uptime_seconds = match (self.state, self.started_at) {
            (PluginState::Running, Some(started)) => {
                Some((Utc::now() - started).num_seconds().max(0))
            }
            _ => None,
        };

        PluginInfo {
            id: self.manifest.id.clone(),
            name: self.manifest.display_name().to_string(),
            version: self.manifest.version.clone(),
            description: self.manifest.description.clone(),
            category: self.manifest.category.clone(),
            critical: self.manifest.critical,
            runtime: self.manifest.runtime.kind,
            dependencies: self.manifest.dependencies.clone(),
            capabilities: self.manifest.capabilities.clone(),
            state: self.state,
            is_builtin: self.is_builtin,
            started_at: self.started_at,
            uptime_seconds,
            last_error: self.last_error.clone(),
            binary_path: self.binary_path.clone(),
            plugin_dir: self.plugin_dir.clone(),
        }
    }
}

/// Read-only snapshot of a registry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub category: Option<String>,
    pub critical: bool,
    pub runtime: RuntimeKind,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub state: PluginState,
    pub is_builtin: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: Option<i64>,
    pub last_error: Option<String>,
    pub binary_path: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
}

/// What the host needs to carry out a start outside the lock
pub struct StartHandle {
    pub plugin: Arc<dyn Plugin>,
    pub is_builtin: bool,
    pub logs: Arc<PluginLogBuffer>,
    pub version: String,
}

/// Outcome of [`PluginRegistry::begin_start`]
pub enum StartDecision {
    /// Already running; starting again is a no-op
    AlreadyRunning,
    /// State is now `starting`; the caller must commit the result
    Begin(StartHandle),
}

/// Outcome of [`PluginRegistry::check_unregister`]
pub enum UnregisterDecision {
    /// No record with that ID
    NotRegistered,
    /// The record was removed
    Removed,
    /// State is now `stopping`; stop the plugin, then call `remove`
    StopFirst(Arc<dyn Plugin>),
}

/// Registry of loaded plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, LoadedPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; IDs must be unique and non-empty
    pub async fn register(&self, record: LoadedPlugin) -> PluginResult<()> {
        let id = record.manifest.id.clone();
        if id.trim().is_empty() {
            return Err(PluginError::invalid_manifest("Plugin ID cannot be empty"));
        }

        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(&id) {
            return Err(PluginError::PluginAlreadyExists { name: id });
        }

        tracing::debug!(
            target: "plugin_registry",
            plugin_id = %id,
            builtin = record.is_builtin,
            "Plugin registered"
        );
        plugins.insert(id, record);
        Ok(())
    }

    /// Drop a record regardless of state
    pub async fn remove(&self, id: &str) -> Option<LoadedPlugin> {
        let removed = self.plugins.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!(target: "plugin_registry", plugin_id = %id, "Plugin unregistered");
        }
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.plugins.read().await.contains_key(id)
    }

    pub async fn get_info(&self, id: &str) -> Option<PluginInfo> {
        self.plugins.read().await.get(id).map(LoadedPlugin::info)
    }

    /// Snapshots of every record, sorted by ID
    pub async fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .plugins
            .read()
            .await
            .values()
            .map(LoadedPlugin::info)
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn state(&self, id: &str) -> Option<PluginState> {
        self.plugins.read().await.get(id).map(|p| p.state)
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.state(id).await == Some(PluginState::Running)
    }

    pub async fn handle(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().await.get(id).map(|p| p.plugin.clone())
    }

    pub async fn logs(&self, id: &str) -> Option<Arc<PluginLogBuffer>> {
        self.plugins.read().await.get(id).map(|p| p.logs.clone())
    }

    pub async fn manifests(&self) -> Vec<PluginManifest> {
        self.plugins
            .read()
            .await
            .values()
            .map(|p| p.manifest.clone())
            .collect()
    }

    /// IDs and handles of every running plugin, sorted by ID
    pub async fn running_handles(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        let mut handles: Vec<(String, Arc<dyn Plugin>)> = self
            .plugins
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.state == PluginState::Running)
            .map(|(id, p)| (id.clone(), p.plugin.clone()))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
    }

    /// Move a plugin into `starting`
    pub async fn begin_start(&self, id: &str) -> PluginResult<StartDecision> {
        let mut plugins = self.plugins.write().await;
        let record = plugins.get_mut(id).ok_or_else(|| PluginError::not_found(id))?;

        match record.state {
            PluginState::Running => Ok(StartDecision::AlreadyRunning),
            state if state.can_start() => {
                record.state = PluginState::Starting;
                Ok(StartDecision::Begin(StartHandle {
                    plugin: record.plugin.clone(),
                    is_builtin: record.is_builtin,
                    logs: record.logs.clone(),
                    version: record.manifest.version.clone(),
                }))
            }
            state => Err(PluginError::InvalidStateTransition {
                name: id.to_string(),
                state,
                action: "start",
            }),
        }
    }

    /// Commit a successful start
    pub async fn mark_running(&self, id: &str) {
        if let Some(record) = self.plugins.write().await.get_mut(id) {
            record.state = PluginState::Running;
            record.started_at = Some(Utc::now());
            record.last_error = None;
        }
    }

    /// Commit a failed start
    pub async fn mark_failed(&self, id: &str, error: impl Into<String>) {
        if let Some(record) = self.plugins.write().await.get_mut(id) {
            record.state = PluginState::Error;
            record.last_error = Some(error.into());
        }
    }

    /// Move a plugin into `stopping`.
    ///
    /// Returns `None` when there is nothing to stop.
    pub async fn begin_stop(&self, id: &str) -> PluginResult<Option<Arc<dyn Plugin>>> {
        let mut plugins = self.plugins.write().await;
        let record = plugins.get_mut(id).ok_or_else(|| PluginError::not_found(id))?;

        match record.state {
            state if state.can_stop() => {
                record.state = PluginState::Stopping;
                Ok(Some(record.plugin.clone()))
            }
            PluginState::Starting => Err(PluginError::InvalidStateTransition {
                name: id.to_string(),
                state: PluginState::Starting,
                action: "stop",
            }),
            _ => Ok(None),
        }
    }

    /// Commit a stop
    pub async fn mark_stopped(&self, id: &str) {
        if let Some(record) = self.plugins.write().await.get_mut(id) {
            record.state = PluginState::Stopped;
            record.started_at = None;
        }
    }

    /// Decide whether a record can be removed, removing it when it is idle
    pub async fn check_unregister(&self, id: &str, force: bool) -> PluginResult<UnregisterDecision> {
        let mut plugins = self.plugins.write().await;
        let Some(record) = plugins.get_mut(id) else {
            return Ok(UnregisterDecision::NotRegistered);
        };

        if record.is_builtin {
            return Err(PluginError::CannotUnregisterBuiltin {
                name: id.to_string(),
            });
        }

        if record.state.is_active() {
            if !force {
                return Err(PluginError::PluginStillRunning {
                    name: id.to_string(),
                    state: record.state,
                });
            }
            record.state = PluginState::Stopping;
            return Ok(UnregisterDecision::StopFirst(record.plugin.clone()));
        }

        plugins.remove(id);
        Ok(UnregisterDecision::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{BuiltinPlugin, PluginService};

    struct Idle;

    impl PluginService for Idle {}

    fn builtin(id: &str) -> LoadedPlugin {
        let plugin = Arc::new(BuiltinPlugin::new(PluginManifest::new(id, "1.0.0"), Idle));
        LoadedPlugin::builtin(plugin, Arc::new(PluginLogBuffer::default()))
    }

    fn external(id: &str) -> LoadedPlugin {
        let mut record = builtin(id);
        record.is_builtin = false;
        record.binary_path = Some(PathBuf::from("/opt/plugins").join(id).join(id));
        record.plugin_dir = Some(PathBuf::from("/opt/plugins").join(id));
        record
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = PluginRegistry::new();
        registry.register(builtin("events")).await.unwrap();
        assert!(matches!(
            registry.register(builtin("events")).await,
            Err(PluginError::PluginAlreadyExists { .. })
        ));
        assert!(registry.contains("events").await);
    }

    #[tokio::test]
    async fn test_list_sorted_by_id() {
        let registry = PluginRegistry::new();
        for id in ["web", "api", "events"] {
            registry.register(builtin(id)).await.unwrap();
        }
        let ids: Vec<String> = registry.list().await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["api", "events", "web"]);
    }

    #[tokio::test]
    async fn test_start_transitions() {
        let registry = PluginRegistry::new();
        registry.register(builtin("api")).await.unwrap();

        assert!(matches!(
            registry.begin_start("api").await.unwrap(),
            StartDecision::Begin(_)
        ));
        assert_eq!(registry.state("api").await, Some(PluginState::Starting));

        // A second start while starting is rejected
        assert!(matches!(
            registry.begin_start("api").await,
            Err(PluginError::InvalidStateTransition { action: "start", .. })
        ));

        registry.mark_running("api").await;
        assert!(registry.is_running("api").await);
        assert!(matches!(
            registry.begin_start("api").await.unwrap(),
            StartDecision::AlreadyRunning
        ));

        let info = registry.get_info("api").await.unwrap();
        assert!(info.started_at.is_some());
        assert_eq!(info.uptime_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_failure_recorded_and_cleared() {
        let registry = PluginRegistry::new();
        registry.register(builtin("api")).await.unwrap();

        registry.begin_start("api").await.unwrap();
        registry.mark_failed("api", "port in use").await;
        let info = registry.get_info("api").await.unwrap();
        assert_eq!(info.state, PluginState::Error);
        assert_eq!(info.last_error.as_deref(), Some("port in use"));

        // Error state may be started again
        registry.begin_start("api").await.unwrap();
        registry.mark_running("api").await;
        assert_eq!(registry.get_info("api").await.unwrap().last_error, None);
    }

    #[tokio::test]
    async fn test_stop_transitions() {
        let registry = PluginRegistry::new();
        registry.register(builtin("api")).await.unwrap();

        assert!(registry.begin_stop("api").await.unwrap().is_none());

        registry.begin_start("api").await.unwrap();
        assert!(registry.begin_stop("api").await.is_err());
        registry.mark_running("api").await;

        assert!(registry.begin_stop("api").await.unwrap().is_some());
        assert_eq!(registry.state("api").await, Some(PluginState::Stopping));
        registry.mark_stopped("api").await;
        assert_eq!(registry.state("api").await, Some(PluginState::Stopped));

        assert!(matches!(
            registry.begin_stop("missing").await,
            Err(PluginError::PluginNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unregister_rules() {
        let registry = PluginRegistry::new();
        registry.register(builtin("core")).await.unwrap();
        registry.register(external("camera")).await.unwrap();

        assert!(matches!(
            registry.check_unregister("nobody", false).await.unwrap(),
            UnregisterDecision::NotRegistered
        ));
        assert!(matches!(
            registry.check_unregister("core", true).await,
            Err(PluginError::CannotUnregisterBuiltin { .. })
        ));

        registry.begin_start("camera").await.unwrap();
        registry.mark_running("camera").await;
        assert!(matches!(
            registry.check_unregister("camera", false).await,
            Err(PluginError::PluginStillRunning {
                state: PluginState::Running,
                ..
            })
        ));
        assert!(matches!(
            registry.check_unregister("camera", true).await.unwrap(),
            UnregisterDecision::StopFirst(_)
        ));
        registry.remove("camera").await;
        assert!(!registry.contains("camera").await);
    }

    #[tokio::test]
    async fn test_idle_external_removed_immediately() {
        let registry = PluginRegistry::new();
        registry.register(external("camera")).await.unwrap();

        assert!(matches!(
            registry.check_unregister("camera", false).await.unwrap(),
            UnregisterDecision::Removed
        ));
        assert!(registry.get_info("camera").await.is_none());
    }

    #[tokio::test]
    async fn test_running_handles_only_running() {
        let registry = PluginRegistry::new();
        for id in ["b", "a", "c"] {
            registry.register(builtin(id)).await.unwrap();
        }
        for id in ["b", "a"] {
            registry.begin_start(id).await.unwrap();
            registry.mark_running(id).await;
        }

        let ids: Vec<String> = registry
            .running_handles()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
