// AirBorne Plugin API
// Plugin lifecycle, dependency-ordered loading and inter-plugin messaging

pub mod bus;
pub mod catalog;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod loader;
pub mod message;
pub mod metadata;
pub mod plugin;
pub mod registry;

pub use bus::{BusStats, MessageBus, MessageHandler, PluginMessageHandler, DEFAULT_MAX_MESSAGES_PER_TICK};
pub use catalog::{PluginCatalog, PluginManifest, MANIFEST_SUFFIX};
pub use context::PluginContext;
pub use error::{PluginError, PluginResult, RegistryError, RegistryResult};
pub use event_bus::{EventBus, EventPriority, EventSubscriptionId};
pub use loader::{LoadReport, PluginLoader};
pub use message::{Message, MessagePriority, Recipients, Topic, UnknownTopic, BROADCAST};
pub use metadata::{
    PluginInfo, PluginMetadata, PluginMetadataBuilder, PluginState, PluginType,
    DEFAULT_UPDATE_PRIORITY, MAX_UPDATE_PRIORITY,
};
pub use plugin::{into_handle, Plugin, PluginFactory, PluginHandle};
pub use registry::ComponentRegistry;

// Re-export the configuration tree plugins receive through their context
pub use airborne_core::ConfigTree;

/// Plugin API version
pub const PLUGIN_API_VERSION: &str = "0.2.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version() {
        assert_eq!(PLUGIN_API_VERSION, "0.2.0");
    }
}
