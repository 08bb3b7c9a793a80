//! Plugin manifest model and parsing
//!
//! A manifest lives next to the plugin's files as `manifest.yaml`
//! (`manifest.yml` and `manifest.json` are accepted too). It is parsed once at
//! discovery time and never changes afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PluginError, PluginResult};
use crate::types::RuntimeKind;

/// Manifest file names, in lookup order
pub const MANIFEST_FILE_NAMES: [&str; 3] = ["manifest.yaml", "manifest.yml", "manifest.json"];

/// Launch metadata for a plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "type", default)]
    pub kind: RuntimeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl RuntimeConfig {
    /// Script path for interpreted runtimes; `script` wins over `entry_point`
    pub fn script_path(&self) -> Option<&str> {
        self.script
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.entry_point.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Declared identity and metadata of one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl PluginManifest {
    /// Create a manifest with just an ID and version
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            description: String::new(),
            category: None,
            critical: false,
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            author: None,
            homepage: None,
            runtime: RuntimeConfig::default(),
        }
    }

    /// Add a dependency on another plugin ID
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Mark the plugin as critical
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Set the runtime kind
    pub fn with_runtime(mut self, kind: RuntimeKind) -> Self {
        self.runtime.kind = kind;
        self
    }

    /// Add a capability
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Parse a YAML manifest
    pub fn from_yaml_str(content: &str) -> PluginResult<Self> {
        let manifest: Self = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a JSON manifest
    pub fn from_json_str(content: &str) -> PluginResult<Self> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest file, choosing the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> PluginResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Locate the manifest file inside a plugin directory
    pub fn find_in_dir(dir: &Path) -> Option<PathBuf> {
        MANIFEST_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Check the fields the host relies on
    pub fn validate(&self) -> PluginResult<()> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(PluginError::invalid_manifest("Plugin ID cannot be empty"));
        }
        if id != self.id || self.id.contains(['/', '\\']) {
            return Err(PluginError::invalid_manifest(format!(
                "Plugin ID '{}' contains invalid characters",
                self.id
            )));
        }
        if self.dependencies.iter().any(|dep| dep.trim().is_empty()) {
            return Err(PluginError::invalid_manifest(format!(
                "Plugin '{}' declares an empty dependency",
                self.id
            )));
        }

        if !self.version.is_empty() && self.semver().is_none() {
            tracing::warn!(
                target: "plugin_manifest",
                plugin_id = %self.id,
                version = %self.version,
                "Plugin version is not valid semver"
            );
        }

        Ok(())
    }

    /// Parsed version, accepting a leading `v`
    pub fn semver(&self) -> Option<semver::Version> {
        let raw = self.version.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        semver::Version::parse(raw).ok()
    }

    /// Display name, falling back to the ID
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
