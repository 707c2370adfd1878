use airborne_core::ConfigTree;
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::event_bus::EventBus;
use crate::registry::ComponentRegistry;

/// Shared services handed to every plugin at initialization.
///
/// Cloning is cheap and every clone refers to the same buses and registry.
#[derive(Clone)]
pub struct PluginContext {
    event_bus: Arc<EventBus>,
    message_bus: Arc<MessageBus>,
    config: Arc<ConfigTree>,
    components: Arc<ComponentRegistry>,
}

impl PluginContext {
    pub fn new(
        event_bus: Arc<EventBus>,
        message_bus: Arc<MessageBus>,
        config: Arc<ConfigTree>,
        components: Arc<ComponentRegistry>,
    ) -> Self {
        Self {
            event_bus,
            message_bus,
            config,
            components,
        }
    }

    /// Context with fresh buses and registry around `config`.
    pub fn standalone(config: ConfigTree) -> Self {
        Self::new(
            Arc::new(EventBus::new()),
            Arc::new(MessageBus::new()),
            Arc::new(config),
            Arc::new(ComponentRegistry::new()),
        )
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn message_bus(&self) -> &Arc<MessageBus> {
        &self.message_bus
    }

    pub fn config(&self) -> &Arc<ConfigTree> {
        &self.config
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    /// Returns a context sharing the same buses and registry, with
    /// `overrides` merged over the session configuration.
    pub fn with_overrides(&self, overrides: &ConfigTree) -> Self {
        Self {
            event_bus: self.event_bus.clone(),
            message_bus: self.message_bus.clone(),
            config: Arc::new(self.config.merged(overrides)),
            components: self.components.clone(),
        }
    }
}
