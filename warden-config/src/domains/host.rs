//! Plugin host configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};

/// Plugin host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for external plugin packages
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Interval between health check ticks
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_health_check_interval"
    )]
    pub health_check_interval: Duration,

    /// Timeout for a single plugin's health check
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_health_check_timeout"
    )]
    pub health_check_timeout: Duration,

    /// Deadline for launching and initializing an external plugin
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_init_timeout"
    )]
    pub init_timeout: Duration,

    /// Deadline for a plugin's stop call
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_stop_timeout"
    )]
    pub stop_timeout: Duration,

    /// How long an external process may take to exit before it is killed
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_stop_grace_period"
    )]
    pub stop_grace_period: Duration,

    /// Stop deadline used when force-unregistering a running plugin
    #[serde(
        with = "crate::domains::utils::serde_duration",
        default = "default_force_stop_timeout"
    )]
    pub force_stop_timeout: Duration,

    /// Plugin IDs the host cannot run without, in addition to manifest flags
    #[serde(default)]
    pub critical_plugins: Vec<String>,

    /// Number of log lines retained per plugin
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            health_check_interval: default_health_check_interval(),
            health_check_timeout: default_health_check_timeout(),
            init_timeout: default_init_timeout(),
            stop_timeout: default_stop_timeout(),
            stop_grace_period: default_stop_grace_period(),
            force_stop_timeout: default_force_stop_timeout(),
            critical_plugins: Vec::new(),
            log_buffer_size: default_log_buffer_size(),
        }
    }
}

impl Validatable for HostConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.plugins_dir.as_os_str().is_empty() {
            return Err(self.validation_error("plugins_dir cannot be empty"));
        }

        validate_duration(
            self.health_check_interval,
            "health_check_interval",
            self.domain_name(),
        )?;
        validate_duration(
            self.health_check_timeout,
            "health_check_timeout",
            self.domain_name(),
        )?;
        validate_duration(self.init_timeout, "init_timeout", self.domain_name())?;
        validate_duration(self.stop_timeout, "stop_timeout", self.domain_name())?;
        validate_duration(
            self.stop_grace_period,
            "stop_grace_period",
            self.domain_name(),
        )?;
        validate_duration(
            self.force_stop_timeout,
            "force_stop_timeout",
            self.domain_name(),
        )?;
        validate_positive(self.log_buffer_size, "log_buffer_size", self.domain_name())?;

        if self.critical_plugins.iter().any(|id| id.is_empty()) {
            return Err(self.validation_error("critical_plugins cannot contain empty IDs"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "host"
    }
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_init_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_force_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_buffer_size() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.plugins_dir, PathBuf::from("./plugins"));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.init_timeout, Duration::from_secs(30));
        assert_eq!(config.stop_grace_period, Duration::from_secs(5));
        assert_eq!(config.log_buffer_size, 1000);
        assert!(config.critical_plugins.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_host_config_rejects_zero_durations() {
        let config = HostConfig {
            init_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_config_rejects_empty_critical_id() {
        let config = HostConfig {
            critical_plugins: vec!["core-api".to_string(), String::new()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_config_partial_yaml() {
        let yaml = r#"
plugins_dir: /opt/warden/plugins
health_check_interval: 10
critical_plugins: [core-api, core-events]
"#;
        let config: HostConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.plugins_dir, PathBuf::from("/opt/warden/plugins"));
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert_eq!(config.critical_plugins, vec!["core-api", "core-events"]);
    }
}
