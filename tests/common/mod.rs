//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use airborne_core::ConfigTree;
use airborne_plugin_api::{
    Message, Plugin, PluginCatalog, PluginContext, PluginLoader, PluginMetadata, PluginType,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Get the path to test fixtures
pub fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("tests").join("fixtures")
}

/// Get the path to plugin manifest fixtures
pub fn plugins_fixtures_dir() -> PathBuf {
    fixtures_dir().join("plugins")
}

/// Shared, ordered record of lifecycle events such as `init:engine`.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Plugin names recorded with the given event prefix, in order.
    pub fn names(&self, event: &str) -> Vec<String> {
        let prefix = format!("{}:", event);
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(String::from))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Plugin that records every lifecycle call and can be told to fail.
#[derive(Clone)]
pub struct RecordingPlugin {
    pub metadata: PluginMetadata,
    pub journal: Journal,
    pub fail_init: bool,
    pub fail_shutdown: bool,
}

impl RecordingPlugin {
    pub fn new(name: &str, deps: &[&str], journal: &Journal) -> Self {
        Self {
            metadata: PluginMetadata::builder(name, "1.0.0", "AirBorne Test", PluginType::AircraftSystem)
                .dependencies(deps.iter().copied())
                .build(),
            journal: journal.clone(),
            fail_init: false,
            fail_shutdown: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.metadata.optional = true;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.metadata.update_priority = priority;
        self
    }

    fn record(&self, event: &str) {
        self.journal
            .record(format!("{}:{}", event, self.metadata.name));
    }
}

impl Plugin for RecordingPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn initialize(&mut self, _context: &PluginContext) -> anyhow::Result<()> {
        self.record("init");
        if self.fail_init {
            anyhow::bail!("{} refused to initialize", self.metadata.name);
        }
        Ok(())
    }

    fn update(&mut self, _dt: f64) -> anyhow::Result<()> {
        self.record("update");
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.record("shutdown");
        if self.fail_shutdown {
            anyhow::bail!("{} failed to shut down", self.metadata.name);
        }
        Ok(())
    }

    fn handle_message(&mut self, message: &Message) -> anyhow::Result<()> {
        self.record(&format!("message {}", message.topic));
        Ok(())
    }
}

/// Catalog serving clones of the given plugins under their own names.
pub fn catalog_of(plugins: Vec<RecordingPlugin>) -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    for plugin in plugins {
        let name = plugin.metadata.name.clone();
        catalog.register(name, move || Box::new(plugin.clone()));
    }
    catalog
}

/// Loader with every catalog entry already discovered.
pub fn discovered_loader(plugins: Vec<RecordingPlugin>) -> PluginLoader {
    let mut loader = PluginLoader::new(catalog_of(plugins));
    loader.discover_catalog();
    loader
}

pub fn test_context() -> PluginContext {
    PluginContext::standalone(ConfigTree::new())
}

/// Route test logs through the test harness; safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        let dir = plugins_fixtures_dir();
        assert!(dir.exists(), "Plugin fixtures directory should exist");
    }
}
