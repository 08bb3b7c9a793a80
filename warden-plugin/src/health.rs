//! Periodic health checks of running plugins

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{publish_health, EventBus};
use crate::registry::PluginRegistry;
use crate::types::{HealthState, HealthStatus};

/// A non-healthy check result
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub plugin_id: String,
    pub status: HealthStatus,
}

/// Checks every running plugin and reports the ones that are not healthy
#[derive(Clone)]
pub struct HealthMonitor {
    registry: Arc<PluginRegistry>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<PluginRegistry>, bus: Arc<dyn EventBus>, timeout: Duration) -> Self {
        Self {
            registry,
            bus,
            timeout,
        }
    }

    /// Run one round of checks concurrently.
    ///
    /// Returns the non-healthy reports sorted by plugin ID.
    pub async fn check_once(&self) -> Vec<HealthReport> {
        let handles = self.registry.running_handles().await;

        let mut set = JoinSet::new();
        for (id, plugin) in handles {
            let timeout = self.timeout;
            set.spawn(async move {
                let status = match tokio::time::timeout(timeout, plugin.health()).await {
                    Ok(status) => status,
                    Err(_) => HealthStatus::unhealthy(format!(
                        "Health check timed out after {}ms",
                        timeout.as_millis()
                    )),
                };
                (id, status)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((plugin_id, status)) if status.state != HealthState::Healthy => {
                    reports.push(HealthReport { plugin_id, status });
                }
                Ok((plugin_id, _)) => {
                    debug!(target: "plugin_health", plugin_id = %plugin_id, "Plugin healthy");
                }
                Err(e) => warn!(target: "plugin_health", error = %e, "Health check task failed"),
            }
        }

        reports.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        for report in &reports {
            warn!(
                target: "plugin_health",
                plugin_id = %report.plugin_id,
                state = %report.status.state,
                message = %report.status.message,
                "Plugin is not healthy"
            );
            publish_health(
                self.bus.as_ref(),
                &report.plugin_id,
                report.status.state,
                &report.status.message,
            );
        }

        reports
    }

    /// Run checks every `interval` until `cancel` fires
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(target: "plugin_health", "Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.check_once().await;
                    }
                }
            }
        })
    }
}
