use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Plugin, PluginFactory};

/// Suffix identifying plugin manifest files during discovery.
pub const MANIFEST_SUFFIX: &str = "_plugin.yaml";

/// Table of every plugin implementation compiled into the binary.
///
/// Discovery resolves manifest entries against this table; the loader only
/// ever instantiates plugins through these factories.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    entries: Vec<(String, PluginFactory)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any earlier entry with the
    /// same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: PluginFactory = Arc::new(factory);
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => {
                tracing::warn!("Replacing catalog entry: {}", name);
                entry.1 = factory;
            }
            None => self.entries.push((name, factory)),
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn factory(&self, name: &str) -> Option<PluginFactory> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.clone())
    }

    /// Entry names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entries", &self.names())
            .finish()
    }
}

/// Contents of a `*_plugin.yaml` manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Catalog key of the implementation
    pub plugin: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: PluginManifest = serde_yaml::from_str(&contents)?;
        if manifest.plugin.trim().is_empty() {
            return Err(PluginError::Manifest {
                path: path.display().to_string(),
                reason: "plugin key cannot be empty".to_string(),
            });
        }
        Ok(manifest)
    }

    pub fn is_manifest_path(path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PluginContext;
    use crate::metadata::{PluginMetadata, PluginType};

    struct Noop(&'static str);

    impl Plugin for Noop {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::builder(self.0, "1.0.0", "test", PluginType::Feature).build()
        }
        fn initialize(&mut self, _context: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }
        fn update(&mut self, _dt: f64) -> anyhow::Result<()> {
            Ok(())
        }
        fn shutdown(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_catalog_keeps_registration_order() {
        let catalog = PluginCatalog::new()
            .with("checklist", || Box::new(Noop("checklist")))
            .with("ground_services", || Box::new(Noop("ground_services")));

        assert_eq!(catalog.names(), vec!["checklist", "ground_services"]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.factory("tcas").is_none());

        let factory = catalog.factory("checklist").unwrap();
        assert_eq!(factory().metadata().name, "checklist");
    }

    #[test]
    fn test_register_replaces_existing_entry() {
        let mut catalog = PluginCatalog::new();
        catalog.register("checklist", || Box::new(Noop("old")));
        catalog.register("checklist", || Box::new(Noop("new")));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.factory("checklist").unwrap()().metadata().name, "new");
    }

    #[test]
    fn test_manifest_parsing() {
        let manifest: PluginManifest = serde_yaml::from_str("plugin: simple_engine\n").unwrap();
        assert!(manifest.enabled);

        let manifest: PluginManifest =
            serde_yaml::from_str("plugin: tcas\nenabled: false\n").unwrap();
        assert_eq!(manifest.plugin, "tcas");
        assert!(!manifest.enabled);

        assert!(serde_yaml::from_str::<PluginManifest>("enabled: true\n").is_err());
    }
}
