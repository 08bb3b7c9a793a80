//! Plugin type definitions and utilities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl PluginState {
    /// States from which a start may begin
    pub fn can_start(self) -> bool {
        matches!(self, PluginState::Stopped | PluginState::Error)
    }

    /// States from which a stop may begin
    pub fn can_stop(self) -> bool {
        matches!(self, PluginState::Running | PluginState::Error)
    }

    /// Running or on its way there
    pub fn is_active(self) -> bool {
        matches!(self, PluginState::Running | PluginState::Starting)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Reported health of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a single health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    #[serde(default)]
    pub message: String,
    pub last_checked: DateTime<Utc>,
}

impl HealthStatus {
    pub fn new(state: HealthState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            last_checked: Utc::now(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Healthy, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

/// How a plugin is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum RuntimeKind {
    /// Compiled into the host
    Builtin,
    /// Native executable in the plugin directory
    #[default]
    Binary,
    /// Native executable built from Go; resolved like `Binary`
    Go,
    /// Script run by a Python interpreter
    Python,
    /// Script run by Node.js
    Node,
}

impl RuntimeKind {
    /// Whether the plugin is launched through an interpreter
    pub fn is_interpreted(self) -> bool {
        matches!(self, RuntimeKind::Python | RuntimeKind::Node)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Binary => "binary",
            Self::Go => "go",
            Self::Python => "python",
            Self::Node => "node",
        }
    }
}

impl From<String> for RuntimeKind {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "builtin" => RuntimeKind::Builtin,
            "go" => RuntimeKind::Go,
            "python" => RuntimeKind::Python,
            "node" => RuntimeKind::Node,
            // Unknown kinds are treated as native binaries
            _ => RuntimeKind::Binary,
        }
    }
}

impl From<RuntimeKind> for String {
    fn from(kind: RuntimeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
