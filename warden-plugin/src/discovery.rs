//! Plugin discovery: manifest scanning and launch resolution
//!
//! Each immediate subdirectory of the plugins directory holding a manifest is
//! a plugin package. Resolution turns a package into the command line used to
//! launch it.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use warden_ipc::LaunchSpec;

use crate::error::{PluginError, PluginResult};
use crate::manifest::{PluginManifest, MANIFEST_FILE_NAMES};
use crate::types::RuntimeKind;

/// Extensions never picked as a fallback executable
const NON_BINARY_EXTENSIONS: [&str; 9] = ["sh", "py", "js", "go", "yaml", "yml", "json", "md", "txt"];

/// A plugin directory with a parsed manifest
#[derive(Debug, Clone)]
pub struct PluginPackage {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
}

/// How to launch a package
#[derive(Debug, Clone)]
pub struct ResolvedLaunch {
    pub spec: LaunchSpec,
    /// Executable or script that identifies the plugin on disk
    pub binary_path: PathBuf,
}

/// A package together with its launch command
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub package: PluginPackage,
    pub launch: ResolvedLaunch,
}

/// Finds plugin packages on disk and resolves how to launch them
#[derive(Debug, Clone)]
pub struct PluginDiscovery {
    run_setup: bool,
}

impl Default for PluginDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginDiscovery {
    pub fn new() -> Self {
        Self { run_setup: true }
    }

    /// Skip `runtime.setup` scripts while resolving
    pub fn without_setup() -> Self {
        Self { run_setup: false }
    }

    /// Parse the manifest of every immediate subdirectory, sorted by name.
    ///
    /// A missing directory yields nothing; invalid manifests are skipped.
    pub fn scan(&self, dir: &Path) -> Vec<PluginPackage> {
        if !dir.is_dir() {
            debug!(target: "plugin_discovery", dir = %dir.display(), "Plugins directory does not exist");
            return Vec::new();
        }

        let mut packages = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target: "plugin_discovery", error = %e, "Failed to read plugins directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let plugin_dir = entry.path();
            let Some(manifest_path) = PluginManifest::find_in_dir(plugin_dir) else {
                debug!(target: "plugin_discovery", dir = %plugin_dir.display(), "No manifest, skipping");
                continue;
            };

            match PluginManifest::from_file(&manifest_path) {
                Ok(manifest) => packages.push(PluginPackage {
                    manifest,
                    dir: plugin_dir.to_path_buf(),
                }),
                Err(e) => warn!(
                    target: "plugin_discovery",
                    path = %manifest_path.display(),
                    error = %e,
                    "Invalid plugin manifest, skipping"
                ),
            }
        }

        packages
    }

    /// Work out the launch command for a package.
    ///
    /// Builtin packages resolve to `None`; they are registered in code.
    pub async fn resolve(&self, package: &PluginPackage) -> PluginResult<Option<ResolvedLaunch>> {
        let manifest = &package.manifest;
        let dir = &package.dir;

        let resolved = match manifest.runtime.kind {
            RuntimeKind::Builtin => return Ok(None),
            RuntimeKind::Python => {
                let script = script_path(package)?;
                self.run_setup_script(package).await;
                let venv_python = dir.join("venv").join("bin").join("python");
                let interpreter = if venv_python.is_file() {
                    venv_python
                } else {
                    PathBuf::from("python3")
                };
                interpreted(package, interpreter, script)
            }
            RuntimeKind::Node => {
                let script = script_path(package)?;
                self.run_setup_script(package).await;
                interpreted(package, PathBuf::from("node"), script)
            }
            RuntimeKind::Binary | RuntimeKind::Go => {
                let binary = find_binary(manifest, dir).ok_or_else(|| PluginError::BinaryNotFound {
                    name: manifest.id.clone(),
                    dir: dir.display().to_string(),
                })?;
                ResolvedLaunch {
                    spec: LaunchSpec::new(&manifest.id, &binary, dir)
                        .with_args(manifest.runtime.args.iter().cloned()),
                    binary_path: binary,
                }
            }
        };

        Ok(Some(resolved))
    }

    /// Scan and resolve every package, skipping the ones that cannot launch
    pub async fn discover(&self, dir: &Path) -> Vec<DiscoveredPlugin> {
        let mut discovered = Vec::new();
        for package in self.scan(dir) {
            match self.resolve(&package).await {
                Ok(Some(launch)) => discovered.push(DiscoveredPlugin { package, launch }),
                Ok(None) => debug!(
                    target: "plugin_discovery",
                    plugin_id = %package.manifest.id,
                    "Builtin plugin directory, skipping"
                ),
                Err(e) => warn!(
                    target: "plugin_discovery",
                    plugin_id = %package.manifest.id,
                    error = %e,
                    "Cannot launch plugin, skipping"
                ),
            }
        }
        discovered
    }

    async fn run_setup_script(&self, package: &PluginPackage) {
        if !self.run_setup {
            return;
        }
        let Some(setup) = package.manifest.runtime.setup.as_deref().filter(|s| !s.is_empty()) else {
            return;
        };

        let setup_path = package.dir.join(setup);
        if !setup_path.is_file() {
            warn!(
                target: "plugin_discovery",
                plugin_id = %package.manifest.id,
                setup = %setup_path.display(),
                "Setup script not found"
            );
            return;
        }

        info!(target: "plugin_discovery", plugin_id = %package.manifest.id, "Running plugin setup script");
        let output = tokio::process::Command::new("/bin/sh")
            .arg(&setup_path)
            .current_dir(&package.dir)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                target: "plugin_discovery",
                plugin_id = %package.manifest.id,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Plugin setup script failed"
            ),
            Err(e) => warn!(
                target: "plugin_discovery",
                plugin_id = %package.manifest.id,
                error = %e,
                "Failed to run plugin setup script"
            ),
        }
    }
}

fn script_path(package: &PluginPackage) -> PluginResult<PathBuf> {
    package
        .manifest
        .runtime
        .script_path()
        .map(|script| package.dir.join(script))
        .ok_or_else(|| {
            PluginError::invalid_manifest(format!(
                "Plugin '{}' has a {} runtime but no script or entry_point",
                package.manifest.id, package.manifest.runtime.kind
            ))
        })
}

fn interpreted(package: &PluginPackage, interpreter: PathBuf, script: PathBuf) -> ResolvedLaunch {
    let spec = LaunchSpec::new(&package.manifest.id, interpreter, &package.dir)
        .with_args(std::iter::once(script.display().to_string()))
        .with_args(package.manifest.runtime.args.iter().cloned());
    ResolvedLaunch {
        spec,
        binary_path: script,
    }
}

/// `-<os>-<arch>` suffix used by cross-built plugin binaries
pub fn platform_suffix() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("-{}-{}", std::env::consts::OS, arch)
}

/// Candidate executable names in lookup order
fn binary_candidates(manifest: &PluginManifest, dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if let Some(binary) = manifest.runtime.binary.as_deref().filter(|b| !b.is_empty()) {
        names.push(binary.to_string());
    }
    names.push(manifest.id.clone());
    names.push(format!("{}-plugin", manifest.id));
    if let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) {
        names.push(dir_name.to_string());
        names.push(format!("{}-plugin", dir_name));
    }

    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }

    let suffix = platform_suffix();
    let mut candidates: Vec<String> = unique.iter().map(|n| format!("{}{}", n, suffix)).collect();
    candidates.extend(unique);
    candidates
}

fn find_binary(manifest: &PluginManifest, dir: &Path) -> Option<PathBuf> {
    if let Some(found) = binary_candidates(manifest, dir)
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| is_executable(path))
    {
        return Some(found);
    }

    // Fall back to the first executable that does not look like a source or data file
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    entries.into_iter().find(|path| {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        !MANIFEST_FILE_NAMES.contains(&name)
            && !NON_BINARY_EXTENSIONS.contains(&ext)
            && is_executable(path)
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) -> PathBuf {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("manifest.yaml"), manifest).unwrap();
        plugin_dir
    }

    fn write_executable(path: &Path) {
        std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_scan_sorted_and_skips_invalid() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "zeta", "id: zeta\n");
        write_plugin(root.path(), "alpha", "id: alpha\n");
        write_plugin(root.path(), "broken", "id: [not, a, string]\n");
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let ids: Vec<String> = PluginDiscovery::new()
            .scan(root.path())
            .into_iter()
            .map(|p| p.manifest.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(PluginDiscovery::new().scan(&root.path().join("nope")).is_empty());
    }

    #[tokio::test]
    async fn test_binary_resolution_order() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(root.path(), "reolink", "id: nvr-reolink\n");
        write_executable(&dir.join("reolink-plugin"));
        write_executable(&dir.join("nvr-reolink"));

        let discovery = PluginDiscovery::new();
        let package = discovery.scan(root.path()).remove(0);
        let launch = discovery.resolve(&package).await.unwrap().unwrap();
        assert_eq!(launch.binary_path, dir.join("nvr-reolink"));

        let platform = dir.join(format!("reolink{}", platform_suffix()));
        write_executable(&platform);
        let launch = discovery.resolve(&package).await.unwrap().unwrap();
        assert_eq!(launch.binary_path, platform);
        assert_eq!(launch.spec.working_dir, dir);
    }

    #[tokio::test]
    async fn test_binary_must_be_executable() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(root.path(), "cam", "id: cam\n");
        std::fs::write(dir.join("cam"), "not executable").unwrap();
        write_executable(&dir.join("run.sh"));

        let discovery = PluginDiscovery::new();
        let package = discovery.scan(root.path()).remove(0);
        assert!(matches!(
            discovery.resolve(&package).await,
            Err(PluginError::BinaryNotFound { .. })
        ));

        write_executable(&dir.join("zz-server"));
        let launch = discovery.resolve(&package).await.unwrap().unwrap();
        assert_eq!(launch.binary_path, dir.join("zz-server"));
    }

    #[tokio::test]
    async fn test_declared_binary_wins() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(
            root.path(),
            "web",
            "id: web\nruntime:\n  type: go\n  binary: web-server\n  args: [\"--port\", \"0\"]\n",
        );
        write_executable(&dir.join("web"));
        write_executable(&dir.join("web-server"));

        let discovery = PluginDiscovery::new();
        let package = discovery.scan(root.path()).remove(0);
        let launch = discovery.resolve(&package).await.unwrap().unwrap();
        assert_eq!(launch.spec.program, dir.join("web-server"));
        assert_eq!(launch.spec.args, vec!["--port", "0"]);
    }

    #[tokio::test]
    async fn test_python_uses_venv_and_runs_setup() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(
            root.path(),
            "detect",
            "id: detect\nruntime:\n  type: python\n  script: main.py\n  setup: setup.sh\n",
        );
        std::fs::write(
            dir.join("setup.sh"),
            "mkdir -p venv/bin && printf '' > venv/bin/python\n",
        )
        .unwrap();

        let discovery = PluginDiscovery::new();
        let package = discovery.scan(root.path()).remove(0);
        let launch = discovery.resolve(&package).await.unwrap().unwrap();
        assert_eq!(launch.spec.program, dir.join("venv/bin/python"));
        assert_eq!(launch.spec.args, vec![dir.join("main.py").display().to_string()]);
        assert_eq!(launch.binary_path, dir.join("main.py"));
    }

    #[tokio::test]
    async fn test_interpreted_without_script_rejected() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "ui", "id: ui\nruntime:\n  type: node\n");

        let discovery = PluginDiscovery::without_setup();
        let package = discovery.scan(root.path()).remove(0);
        assert!(matches!(
            discovery.resolve(&package).await,
            Err(PluginError::InvalidManifest { .. })
        ));
        assert!(discovery.discover(root.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_node_and_builtin() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(
            root.path(),
            "ui",
            "id: ui\nruntime:\n  type: node\n  entry_point: index.js\n",
        );
        write_plugin(root.path(), "core", "id: core\nruntime:\n  type: builtin\n");

        let discovery = PluginDiscovery::without_setup();
        let discovered = discovery.discover(root.path()).await;
        assert_eq!(discovered.len(), 1);
        let launch = &discovered[0].launch;
        assert_eq!(launch.spec.program, PathBuf::from("node"));
        assert_eq!(launch.spec.args, vec![dir.join("index.js").display().to_string()]);
    }
}
