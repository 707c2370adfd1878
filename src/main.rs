use airborne_core::config::{AppConfig, LogFormat, LoggingConfig};
use airborne_plugin_api::{
    ComponentRegistry, EventBus, MessageBus, PluginContext, PluginLoader, Topic,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod demo_plugins;
mod simulation;

use simulation::Simulation;

/// AirBorne - plugin-driven flight simulator core
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "AIRBORNE_CONFIG")]
    config: Option<PathBuf>,

    /// Additional directories scanned for plugin manifests
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Stop after this many physics ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::from_config_builder(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => AppConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.plugins.directories.extend(args.plugin_dirs.iter().cloned());
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    info!("Starting {} v{}", config.app.name, config.app.version);
    if let Some(path) = &args.config {
        info!("Configuration loaded from {:?}", path);
    }

    let context = PluginContext::new(
        Arc::new(EventBus::new()),
        Arc::new(MessageBus::new()),
        Arc::new(config.settings.clone()),
        Arc::new(ComponentRegistry::new()),
    );

    // Without an audio plugin, spoken callouts go to the log.
    context
        .message_bus()
        .subscribe_fn(Topic::TtsSpeak, "console", |msg| {
            info!("TTS: {}", msg.get_as::<String>("text").unwrap_or_default());
            Ok(())
        });

    let mut loader = PluginLoader::new(demo_plugins::catalog());
    let discovered = if config.plugins.directories.is_empty() {
        loader.discover_catalog()
    } else {
        loader.discover(config.plugins.directories.as_slice())
    };

    let requested: Vec<String> = if config.plugins.enabled.is_empty() {
        discovered.iter().map(|m| m.name.clone()).collect()
    } else {
        config.plugins.enabled.clone()
    };
    if requested.is_empty() {
        warn!("No plugins to load");
    }

    let report = loader
        .load_all(requested.as_slice(), &context)
        .context("Failed to load plugins")?;
    info!("Loaded plugins: {}", report.loaded.join(", "));
    for (name, error) in &report.skipped {
        warn!("Optional plugin {} not loaded: {}", name, error);
    }

    let mut simulation = Simulation::new(loader, context, config.simulation.clone());
    simulation.run(args.ticks);
    simulation.shutdown();

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.filter_directives()))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}
