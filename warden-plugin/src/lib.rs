//! Plugin system for Warden
//!
//! This crate holds everything the host needs to run plugins: manifests and
//! their dependency graph, the [`Plugin`] trait with builtin and external
//! adapters, the registry and its state machine, discovery, health checks and
//! the [`PluginHost`] that schedules it all.

pub mod builtin;
pub mod bus;
pub mod discovery;
pub mod error;
pub mod external;
pub mod graph;
pub mod health;
pub mod host;
pub mod logs;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod types;

// Re-export main types
pub use builtin::{BuiltinPlugin, PluginService};
pub use bus::{subjects, BroadcastBus, BusError, BusMessage, EventBus, HealthEvent, LifecycleEvent, NoopBus};
pub use discovery::{DiscoveredPlugin, PluginDiscovery, PluginPackage, ResolvedLaunch};
pub use error::{PluginError, PluginResult};
pub use external::ExternalPlugin;
pub use graph::{build_startup_order, group_by_dependency_level};
pub use health::{HealthMonitor, HealthReport};
pub use host::PluginHost;
pub use logs::{LogEntry, PluginLogBuffer};
pub use manifest::{PluginManifest, RuntimeConfig};
pub use plugin::{Plugin, PluginContext};
pub use registry::{LoadedPlugin, PluginInfo, PluginRegistry};
pub use types::{HealthState, HealthStatus, PluginState, RuntimeKind};
