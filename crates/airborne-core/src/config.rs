//! Configuration management for the AirBorne simulator.
//!
//! This module provides the session configuration that the bootstrap binary
//! reads before any plugin is loaded:
//! - Loading from YAML files
//! - Environment variable overrides (`AIRBORNE__SECTION__KEY`)
//! - Validation of the simulation timing and message budget
//! - A free-form `settings` tree handed to plugins unchanged

use crate::error::{ConfigError, Result};
use crate::tree::ConfigTree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use airborne_core::config::AppConfig;
///
/// let config = AppConfig::from_file("config/airborne.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application-wide settings
    #[serde(default)]
    pub app: ApplicationConfig,

    /// Tick timing and message budget
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Plugin discovery and selection
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings passed to every plugin through its context
    #[serde(default)]
    pub settings: ConfigTree,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering environment
    /// variables prefixed with `AIRBORNE` over the file.
    ///
    /// The `config` crate lowercases keys, so `settings` is read again
    /// straight from the file and keeps its original case. Environment
    /// overrides apply to the typed sections only.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            // Override with environment variables (AIRBORNE__SIMULATION__PHYSICS_HZ=120)
            .add_source(
                config::Environment::with_prefix("AIRBORNE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut app: AppConfig = config
            .try_deserialize()
            .map_err(|e| ConfigError::InvalidFormat {
                reason: e.to_string(),
            })?;
        app.settings = Self::from_file(path)?.settings;
        Ok(app)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.logging.parse_level()?;

        let mut seen = std::collections::HashSet::new();
        for name in &self.plugins.enabled {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid_value("plugins.enabled", "empty plugin name").into());
            }
            if !seen.insert(name) {
                return Err(ConfigError::invalid_value(
                    "plugins.enabled",
                    format!("duplicate plugin name: {}", name),
                )
                .into());
            }
        }

        Ok(())
    }
}

/// Application-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

fn default_app_name() -> String {
    "airborne".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

/// Fixed-timestep simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Physics update rate in Hz
    #[serde(default = "default_physics_hz")]
    pub physics_hz: u32,

    /// Target frame rate in Hz
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    /// Message bus budget per tick
    #[serde(default = "default_max_messages_per_tick")]
    pub max_messages_per_tick: usize,

    /// Physics steps allowed per frame before the accumulator is clamped
    #[serde(default = "default_max_catch_up_steps")]
    pub max_catch_up_steps: u32,
}

fn default_physics_hz() -> u32 {
    60
}

fn default_target_fps() -> u32 {
    60
}

fn default_max_messages_per_tick() -> usize {
    100
}

fn default_max_catch_up_steps() -> u32 {
    5
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            physics_hz: default_physics_hz(),
            target_fps: default_target_fps(),
            max_messages_per_tick: default_max_messages_per_tick(),
            max_catch_up_steps: default_max_catch_up_steps(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.physics_hz == 0 {
            return Err(ConfigError::invalid_value("simulation.physics_hz", "must be positive").into());
        }
        if self.target_fps == 0 {
            return Err(ConfigError::invalid_value("simulation.target_fps", "must be positive").into());
        }
        if self.max_messages_per_tick == 0 {
            return Err(ConfigError::invalid_value(
                "simulation.max_messages_per_tick",
                "must be positive",
            )
            .into());
        }
        if self.max_catch_up_steps == 0 {
            return Err(ConfigError::invalid_value(
                "simulation.max_catch_up_steps",
                "must be positive",
            )
            .into());
        }
        Ok(())
    }

    /// Fixed physics timestep.
    pub fn physics_dt(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.physics_hz.max(1)))
    }

    /// Target wall-clock duration of one frame.
    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

/// Plugin discovery and selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for `*_plugin.yaml` manifests
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Plugins to load at startup (dependencies are pulled in automatically).
    /// Empty means every discovered plugin.
    #[serde(default)]
    pub enabled: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file_line: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }

    /// Builds an `EnvFilter`-compatible directive string, e.g.
    /// `info,airborne_plugin_api=debug`.
    pub fn filter_directives(&self) -> String {
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();

        let mut directives = vec![self.level.clone()];
        directives.extend(modules.into_iter().map(|(module, level)| format!("{}={}", module, level)));
        directives.join(",")
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}
