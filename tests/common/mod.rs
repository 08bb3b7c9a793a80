//! Shared fixtures: plugin directories backed by `/bin/sh` scripts

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warden_config::HostConfig;
use warden_plugin::{EventBus, NoopBus, PluginHost};

/// Behaviour is switched by marker files in the plugin directory:
/// `fail_init`, `ignore_shutdown` and `health.json`.
const PLUGIN_SCRIPT: &str = r#"#!/bin/sh
echo "booting $(basename "$PLUGIN_PATH")" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  params=$(printf '%s\n' "$line" | sed -n 's/.*"params":\(.*\)}$/\1/p')
  case "$method" in
    initialize)
      printf '%s' "$params" > "$PLUGIN_PATH/init_params.json"
      if [ -f "$PLUGIN_PATH/fail_init" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32001,"message":"init refused"}}\n' "$id"
      else
        printf '{"jsonrpc":"2.0","id":%s,"result":{"ready":true}}\n' "$id"
      fi ;;
    health)
      if [ -f "$PLUGIN_PATH/health.json" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$(cat "$PLUGIN_PATH/health.json")"
      else
        printf '{"jsonrpc":"2.0","id":%s,"result":{"state":"healthy","message":"ok"}}\n' "$id"
      fi ;;
    shutdown)
      if [ ! -f "$PLUGIN_PATH/ignore_shutdown" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":null}\n' "$id"
        exit 0
      fi ;;
    pid)
      printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$$" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$params" ;;
  esac
done
if [ -f "$PLUGIN_PATH/ignore_shutdown" ]; then
  trap '' TERM INT
  while true; do sleep 1; done
fi
"#;

pub struct Fixture {
    pub root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        init_quiet_logging();
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.path().join("plugins")
    }

    /// Write `plugins/<id>/manifest.yaml` and an executable named after the ID
    pub fn add_plugin(&self, id: &str, deps: &[&str], critical: bool) -> PathBuf {
        let dir = self.write_manifest(id, deps, critical, "1.0.0");

        let binary = dir.join(id);
        std::fs::write(&binary, PLUGIN_SCRIPT).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }

    /// Write (or rewrite) only the manifest of `plugins/<id>`
    pub fn write_manifest(&self, id: &str, deps: &[&str], critical: bool, version: &str) -> PathBuf {
        let dir = self.plugins_dir().join(id);
        std::fs::create_dir_all(&dir).unwrap();

        let deps = deps
            .iter()
            .map(|d| format!("\"{}\"", d))
            .collect::<Vec<_>>()
            .join(", ");
        let manifest = format!(
            "id: {id}\nname: {id}\nversion: {version}\ncritical: {critical}\ndependencies: [{deps}]\nruntime:\n  type: binary\n"
        );
        std::fs::write(dir.join("manifest.yaml"), manifest).unwrap();
        dir
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            plugins_dir: self.plugins_dir(),
            init_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            stop_grace_period: Duration::from_secs(2),
            force_stop_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(3600),
            health_check_timeout: Duration::from_secs(2),
            ..HostConfig::default()
        }
    }

    pub fn host(&self) -> PluginHost {
        self.host_with(self.host_config(), Arc::new(NoopBus))
    }

    pub fn host_with(&self, config: HostConfig, bus: Arc<dyn EventBus>) -> PluginHost {
        PluginHost::new(config, bus)
    }
}

pub fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), "").unwrap();
}

/// Whether a process with this PID still exists
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Helper to suppress logging output during test execution
fn init_quiet_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();
    });
}
