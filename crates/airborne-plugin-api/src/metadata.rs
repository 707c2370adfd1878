use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PluginError, PluginResult};
use crate::plugin::PluginHandle;

/// Highest accepted `update_priority`.
pub const MAX_UPDATE_PRIORITY: u32 = 1000;

/// Default `update_priority` for plugins that don't care about ordering.
pub const DEFAULT_UPDATE_PRIORITY: u32 = 100;

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Physics, audio, rendering, input
    Core,
    /// Engine, electrical, hydraulics, fuel
    #[serde(rename = "aircraft")]
    AircraftSystem,
    /// Terrain, weather, traffic, airports
    World,
    /// Passengers, boarding, services
    Cabin,
    /// FMC, autopilot, TCAS, navigation
    Avionics,
    /// Multiplayer, live ATC
    Network,
    /// Checklists, ground services, tutorials
    Feature,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::AircraftSystem => "aircraft",
            Self::World => "world",
            Self::Cabin => "cabin",
            Self::Avionics => "avionics",
            Self::Network => "network",
            Self::Feature => "feature",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing a plugin.
///
/// Produced by [`Plugin::metadata`](crate::Plugin::metadata) and used for
/// discovery, dependency resolution and tick ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier (e.g. "simple_electrical")
    pub name: String,
    pub version: String,
    pub author: String,
    pub plugin_type: PluginType,
    /// Plugins that must be loaded first, in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Capabilities this plugin registers in the component registry
    #[serde(default)]
    pub provides: Vec<String>,
    /// Whether the session can continue if this plugin fails to load
    #[serde(default)]
    pub optional: bool,
    /// Lower values update earlier in the tick (0-1000)
    #[serde(default = "default_update_priority")]
    pub update_priority: u32,
    /// Whether the plugin takes part in the fixed-rate update
    #[serde(default = "default_true")]
    pub requires_physics: bool,
    #[serde(default)]
    pub requires_network: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

fn default_update_priority() -> u32 {
    DEFAULT_UPDATE_PRIORITY
}

fn default_true() -> bool {
    true
}

impl PluginMetadata {
    /// Starts a builder with the four required fields.
    pub fn builder(
        name: impl Into<String>,
        version: impl Into<String>,
        author: impl Into<String>,
        plugin_type: PluginType,
    ) -> PluginMetadataBuilder {
        PluginMetadataBuilder {
            metadata: PluginMetadata {
                name: name.into(),
                version: version.into(),
                author: author.into(),
                plugin_type,
                dependencies: Vec::new(),
                provides: Vec::new(),
                optional: false,
                update_priority: DEFAULT_UPDATE_PRIORITY,
                requires_physics: true,
                requires_network: false,
                description: None,
                url: None,
            },
        }
    }

    /// Checks required fields and the priority range.
    pub fn validate(&self) -> PluginResult<()> {
        let invalid = |reason: &str| PluginError::InvalidMetadata {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("plugin name cannot be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("plugin version cannot be empty"));
        }
        if self.author.trim().is_empty() {
            return Err(invalid("plugin author cannot be empty"));
        }
        if self.update_priority > MAX_UPDATE_PRIORITY {
            return Err(invalid("update priority must be between 0 and 1000"));
        }
        if self.dependencies.iter().any(|dep| dep == &self.name) {
            return Err(invalid("plugin cannot depend on itself"));
        }
        Ok(())
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == name)
    }
}

/// Builder for [`PluginMetadata`].
#[derive(Debug, Clone)]
pub struct PluginMetadataBuilder {
    metadata: PluginMetadata,
}

impl PluginMetadataBuilder {
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.metadata.dependencies.push(name.into());
        self
    }

    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata
            .dependencies
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn provides(mut self, capability: impl Into<String>) -> Self {
        self.metadata.provides.push(capability.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.metadata.optional = optional;
        self
    }

    pub fn update_priority(mut self, priority: u32) -> Self {
        self.metadata.update_priority = priority;
        self
    }

    pub fn requires_physics(mut self, requires: bool) -> Self {
        self.metadata.requires_physics = requires;
        self
    }

    pub fn requires_network(mut self, requires: bool) -> Self {
        self.metadata.requires_network = requires;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.metadata.url = Some(url.into());
        self
    }

    pub fn build(self) -> PluginMetadata {
        self.metadata
    }
}

/// Plugin lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Known to the loader, no instance yet
    Unregistered,
    /// Instance created, `initialize` in progress
    Loading,
    /// Initialized successfully
    Loaded,
    /// Updated at least once by the tick loop
    Running,
    /// `shutdown` in progress
    Unloading,
    /// Cleanly shut down
    UnloadedAfterRun,
    /// Failed during initialize, update bookkeeping or shutdown
    Error,
}

impl PluginState {
    fn rank(self) -> u8 {
        match self {
            Self::Unregistered => 0,
            Self::Loading => 1,
            Self::Loaded => 2,
            Self::Running => 3,
            Self::Unloading => 4,
            Self::UnloadedAfterRun => 5,
            Self::Error => u8::MAX,
        }
    }

    /// Transitions move forward along the lifecycle one phase at a time
    /// (`Running` may be skipped). `Error` is reachable from anywhere and is
    /// terminal.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        match (self, next) {
            (Self::Error, _) => false,
            (_, Self::Error) => true,
            (Self::Loaded, Self::Unloading) => true,
            (current, next) => next.rank() == current.rank() + 1,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Loaded | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::UnloadedAfterRun | Self::Error)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "unregistered",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Unloading => "unloading",
            Self::UnloadedAfterRun => "unloaded_after_run",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A plugin instance tracked by the loader.
#[derive(Clone)]
pub struct PluginInfo {
    pub plugin: PluginHandle,
    pub metadata: PluginMetadata,
    state: PluginState,
    error: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl PluginInfo {
    pub(crate) fn new(plugin: PluginHandle, metadata: PluginMetadata, state: PluginState) -> Self {
        Self {
            plugin,
            metadata,
            state,
            error: None,
            loaded_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Message of the error that moved this instance to `Error`, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Applies a lifecycle transition. Illegal transitions are refused and
    /// logged; the state is left unchanged.
    pub(crate) fn transition(&mut self, next: PluginState) -> bool {
        if self.state.can_transition_to(next) {
            tracing::debug!("Plugin {} state {} -> {}", self.metadata.name, self.state, next);
            self.state = next;
            true
        } else {
            tracing::warn!(
                "Refusing plugin {} state transition {} -> {}",
                self.metadata.name,
                self.state,
                next
            );
            false
        }
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.transition(PluginState::Error);
        self.error = Some(error.into());
    }
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfo")
            .field("metadata", &self.metadata)
            .field("state", &self.state)
            .field("error", &self.error)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PluginMetadata {
        PluginMetadata::builder("simple_engine", "1.0.0", "AirBorne Team", PluginType::AircraftSystem)
            .dependency("simple_electrical")
            .dependency("simple_fuel")
            .provides("engine")
            .update_priority(20)
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let metadata =
            PluginMetadata::builder("audio", "0.1.0", "AirBorne Team", PluginType::Core).build();
        assert!(metadata.dependencies.is_empty());
        assert!(!metadata.optional);
        assert_eq!(metadata.update_priority, DEFAULT_UPDATE_PRIORITY);
        assert!(metadata.requires_physics);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_builder_keeps_dependency_order() {
        let metadata = engine();
        assert_eq!(metadata.dependencies, vec!["simple_electrical", "simple_fuel"]);
        assert!(metadata.depends_on("simple_fuel"));
        assert!(!metadata.depends_on("engine"));
    }

    #[test]
    fn test_validation() {
        let mut metadata = engine();
        metadata.update_priority = 1001;
        assert!(matches!(
            metadata.validate(),
            Err(PluginError::InvalidMetadata { .. })
        ));

        let mut metadata = engine();
        metadata.author = String::new();
        assert!(metadata.validate().is_err());

        let mut metadata = engine();
        metadata.dependencies.push("simple_engine".to_string());
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_metadata_yaml() {
        let yaml = r#"
name: tcas
version: 2.0.0
author: AirBorne Team
plugin_type: avionics
dependencies: [position_awareness]
optional: true
"#;
        let metadata: PluginMetadata = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(metadata.plugin_type, PluginType::Avionics);
        assert!(metadata.optional);
        assert_eq!(metadata.update_priority, DEFAULT_UPDATE_PRIORITY);
        assert!(metadata.requires_physics);
    }

    #[test]
    fn test_state_transitions() {
        use PluginState::*;

        assert!(Unregistered.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Running));
        assert!(Loaded.can_transition_to(Unloading));
        assert!(Running.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(UnloadedAfterRun));

        assert!(!Loaded.can_transition_to(Loading));
        assert!(!Unregistered.can_transition_to(Loaded));
        assert!(!UnloadedAfterRun.can_transition_to(Loading));

        for state in [Unregistered, Loading, Loaded, Running, Unloading, UnloadedAfterRun] {
            assert!(state.can_transition_to(Error));
        }
        assert!(!Error.can_transition_to(Loading));
        assert!(!Error.can_transition_to(Error));
    }
}
