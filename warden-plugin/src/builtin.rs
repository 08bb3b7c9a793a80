//! Adapter for plugins compiled into the host

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use crate::plugin::{Plugin, PluginContext};
use crate::types::{HealthStatus, RuntimeKind};

/// Behaviour of an in-process plugin.
///
/// Every method has a default, so a service only overrides what it needs.
#[async_trait]
pub trait PluginService: Send + Sync + 'static {
    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
        let _ = ctx;
        Ok(())
    }

    async fn start(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy("Plugin running")
    }

    async fn handle(&self, method: &str, params: Value) -> PluginResult<Value> {
        let _ = params;
        Err(PluginError::generic(format!("Unknown method '{}'", method)))
    }
}

/// A builtin plugin: a manifest plus the service implementing it
pub struct BuiltinPlugin<S> {
    manifest: PluginManifest,
    service: S,
}

impl<S: PluginService> BuiltinPlugin<S> {
    pub fn new(mut manifest: PluginManifest, service: S) -> Self {
        manifest.runtime.kind = RuntimeKind::Builtin;
        Self { manifest, service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

#[async_trait]
impl<S: PluginService> Plugin for BuiltinPlugin<S> {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&self, ctx: &PluginContext) -> PluginResult<()> {
        self.service.initialize(ctx).await
    }

    async fn start(&self) -> PluginResult<()> {
        self.service.start().await
    }

    async fn stop(&self) -> PluginResult<()> {
        self.service.stop().await
    }

    async fn health(&self) -> HealthStatus {
        self.service.health().await
    }

    async fn call(&self, method: &str, params: Value) -> PluginResult<Value> {
        self.service.handle(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthState;

    struct Echo;

    #[async_trait]
    impl PluginService for Echo {
        async fn handle(&self, method: &str, params: Value) -> PluginResult<Value> {
            match method {
                "echo" => Ok(params),
                other => Err(PluginError::generic(format!("Unknown method '{}'", other))),
            }
        }
    }

    struct Defaults;

    impl PluginService for Defaults {}

    #[tokio::test]
    async fn test_builtin_forwards_to_service() {
        let plugin = BuiltinPlugin::new(PluginManifest::new("core-events", "1.0.0"), Echo);
        assert_eq!(plugin.manifest().runtime.kind, RuntimeKind::Builtin);
        assert_eq!(plugin.id(), "core-events");

        let reply = plugin
            .call("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(reply, serde_json::json!({"x": 1}));
        assert!(plugin.call("nope", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_service_defaults() {
        let plugin = BuiltinPlugin::new(PluginManifest::new("config", "1.0.0"), Defaults);
        let ctx = PluginContext::new("config", serde_json::json!({}));

        plugin.initialize(&ctx).await.unwrap();
        plugin.start().await.unwrap();
        assert_eq!(plugin.health().await.state, HealthState::Healthy);
        plugin.stop().await.unwrap();
    }
}
