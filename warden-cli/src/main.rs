use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use warden_config::{ConfigLoader, WardenConfig};
use warden_logging::{init_logging_from_config, init_simple_tracing, LogLevel};
use warden_plugin::{
    build_startup_order, group_by_dependency_level, NoopBus, PluginDiscovery, PluginHost,
};

mod cli;

use cli::{Cli, Commands, ConfigCommands};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<WardenConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) if path.exists() => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        Some(path) => {
            eprintln!("Configuration file not found: {:?}. Using defaults.", path);
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Initialize logging from configuration, with the CLI level taking precedence
fn init_logging(config: &WardenConfig, log_level: Option<&String>) -> Result<()> {
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        match level_str.parse::<LogLevel>() {
            Ok(level) => logging_config.level = level,
            Err(_) => return init_simple_tracing(level_str),
        }
    }

    if let Err(e) = init_logging_from_config(&logging_config) {
        eprintln!(
            "Failed to initialize structured logging: {}, falling back to simple tracing",
            e
        );
        init_simple_tracing(&logging_config.level.to_string())?;
    }
    Ok(())
}

fn plugins_dir(config: &WardenConfig, override_dir: Option<PathBuf>) -> PathBuf {
    override_dir.unwrap_or_else(|| config.host.plugins_dir.clone())
}

/// Start the host and block until Ctrl-C
async fn run_command(mut config: WardenConfig, override_dir: Option<PathBuf>) -> Result<()> {
    config.host.plugins_dir = plugins_dir(&config, override_dir);
    info!(plugins_dir = %config.host.plugins_dir.display(), "Starting Warden plugin host");

    let host = PluginHost::new(config.host.clone(), Arc::new(NoopBus));

    if let Err(e) = host.start().await {
        error!("Plugin host failed to start: {}", e);
        host.stop().await.context("Failed to stop plugin host")?;
        return Err(e).context("Failed to start plugin host");
    }

    for info in host.list().await {
        info!(
            plugin_id = %info.id,
            state = %info.state,
            version = %info.version,
            "Plugin status"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    host.stop().await.context("Failed to stop plugin host")?;
    info!("Warden plugin host shutdown complete");
    Ok(())
}

/// Print dependency levels for the plugins on disk
fn order_command(config: &WardenConfig, override_dir: Option<PathBuf>) -> Result<()> {
    let dir = plugins_dir(config, override_dir);
    let manifests: Vec<_> = PluginDiscovery::without_setup()
        .scan(&dir)
        .into_iter()
        .map(|package| package.manifest)
        .collect();

    if manifests.is_empty() {
        println!("No plugins found in {}", dir.display());
        return Ok(());
    }

    let order = build_startup_order(&manifests).context("Failed to resolve plugin dependencies")?;
    for (index, level) in group_by_dependency_level(&order, &manifests)
        .iter()
        .enumerate()
    {
        println!("Level {}: {}", index, level.join(", "));
    }
    Ok(())
}

/// List launchable plugins
async fn discover_command(
    config: &WardenConfig,
    override_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let dir = plugins_dir(config, override_dir);
    let discovered = PluginDiscovery::without_setup().discover(&dir).await;

    if json {
        let entries: Vec<serde_json::Value> = discovered
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.package.manifest.id,
                    "version": d.package.manifest.version,
                    "runtime": d.package.manifest.runtime.kind,
                    "dependencies": d.package.manifest.dependencies,
                    "critical": d.package.manifest.critical,
                    "dir": d.package.dir,
                    "command": d.launch.spec.command_line(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if discovered.is_empty() {
        println!("No plugins found in {}", dir.display());
        return Ok(());
    }

    for d in &discovered {
        let manifest = &d.package.manifest;
        println!(
            "{} {} ({}){}",
            manifest.id,
            manifest.version,
            manifest.runtime.kind,
            if manifest.critical { " [critical]" } else { "" }
        );
        println!("    command: {}", d.launch.spec.command_line());
        if !manifest.dependencies.is_empty() {
            println!("    depends on: {}", manifest.dependencies.join(", "));
        }
    }
    Ok(())
}

fn generate_config(output: Option<&Path>, force: bool) -> Result<()> {
    let sample = WardenConfig::generate_sample();

    let Some(path) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if path.exists() && !force {
        anyhow::bail!(
            "File {:?} already exists. Use --force to overwrite.",
            path
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    std::fs::write(path, sample).with_context(|| format!("Failed to write {:?}", path))?;
    println!("Generated configuration: {:?}", path);
    Ok(())
}

fn config_command(config: &WardenConfig, cmd: &ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Generate { output, force } => generate_config(output.as_deref(), *force),
        ConfigCommands::Validate { config_file } => {
            ConfigLoader::new()
                .from_file(config_file)
                .with_context(|| format!("Configuration {:?} is invalid", config_file))?;
            println!("Configuration {:?} is valid", config_file);
            Ok(())
        }
        ConfigCommands::Show { format } => {
            let rendered = match format.as_str() {
                "json" => serde_json::to_string_pretty(config)?,
                "yaml" => serde_yaml::to_string(config)?,
                other => anyhow::bail!("Unsupported format '{}', expected yaml or json", other),
            };
            println!("{}", rendered);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Sample generation must work even when the current config is broken
    if let Commands::Config {
        config_cmd: ConfigCommands::Generate { output, force },
    } = &cli.command
    {
        return generate_config(output.as_deref(), *force);
    }

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config, cli.log_level.as_ref())?;
    debug!("Warden CLI starting");

    match &cli.command {
        Commands::Run { plugins_dir } => run_command(config.clone(), plugins_dir.clone()).await,
        Commands::Order { plugins_dir } => order_command(&config, plugins_dir.clone()),
        Commands::Discover { plugins_dir, json } => {
            discover_command(&config, plugins_dir.clone(), *json).await
        }
        Commands::Config { config_cmd } => config_command(&config, config_cmd),
    }
}
