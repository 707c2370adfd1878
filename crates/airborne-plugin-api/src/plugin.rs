//! The contract every simulator subsystem implements.

use airborne_core::ConfigTree;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::PluginContext;
use crate::message::Message;
use crate::metadata::PluginMetadata;

/// Shared handle to a running plugin instance.
///
/// The loader hands out clones of this handle; two handles refer to the same
/// instance exactly when `Arc::ptr_eq` holds.
pub type PluginHandle = Arc<Mutex<Box<dyn Plugin>>>;

/// Constructs a fresh, uninitialized plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Base interface for all plugins.
///
/// Engines, electrical buses, avionics and audio are all plugins. The loader
/// guarantees that every plugin named in `metadata().dependencies` has been
/// initialized before `initialize` is called on this one.
///
/// # Example
///
/// ```
/// use airborne_plugin_api::{Plugin, PluginContext, PluginMetadata, PluginType};
///
/// #[derive(Default)]
/// struct Beacon {
///     elapsed: f64,
/// }
///
/// impl Plugin for Beacon {
///     fn metadata(&self) -> PluginMetadata {
///         PluginMetadata::builder("beacon", "1.0.0", "AirBorne Team", PluginType::AircraftSystem)
///             .provides("beacon_light")
///             .build()
///     }
///
///     fn initialize(&mut self, _context: &PluginContext) -> anyhow::Result<()> {
///         Ok(())
///     }
///
///     fn update(&mut self, dt: f64) -> anyhow::Result<()> {
///         self.elapsed += dt;
///         Ok(())
///     }
///
///     fn shutdown(&mut self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send {
    /// Describes this plugin. Must be cheap and must not depend on
    /// initialization having happened.
    fn metadata(&self) -> PluginMetadata;

    /// Called once after dependencies are loaded. Register capabilities and
    /// subscribe message handlers here.
    fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()>;

    /// Called once per tick with the fixed timestep in seconds.
    fn update(&mut self, dt: f64) -> anyhow::Result<()>;

    /// Called when the plugin is unloaded. May run after a failure, so it
    /// should tolerate partially initialized state.
    fn shutdown(&mut self) -> anyhow::Result<()>;

    /// Receives messages routed through a [`PluginMessageHandler`](crate::PluginMessageHandler).
    fn handle_message(&mut self, _message: &Message) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the plugin's configuration changes at runtime.
    fn on_config_changed(&mut self, _config: &ConfigTree) {}

    /// Called when `update` fails.
    fn on_error(&mut self, error: &anyhow::Error) {
        tracing::error!("Error in plugin {}: {:#}", self.metadata().name, error);
    }
}

/// Wraps a concrete plugin into a shareable handle.
pub fn into_handle(plugin: Box<dyn Plugin>) -> PluginHandle {
    Arc::new(Mutex::new(plugin))
}
