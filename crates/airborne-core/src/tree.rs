//! Read-only configuration tree handed to plugins.
//!
//! The runtime never interprets the tree; it is carried inside the plugin
//! context so each plugin can read its own settings with dotted paths such as
//! `"electrical.battery_voltage"`.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Hierarchical configuration values backed by a JSON object.
///
/// # Examples
///
/// ```
/// use airborne_core::ConfigTree;
///
/// let tree = ConfigTree::from_yaml("audio:\n  master_volume: 0.8\n").unwrap();
/// let volume: f64 = tree.get_or("audio.master_volume", 1.0);
/// assert_eq!(volume, 0.8);
/// assert_eq!(tree.get_or("audio.missing", 1.0), 1.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree {
    root: Map<String, Value>,
}

impl ConfigTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value. Anything other than an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::InvalidFormat {
                reason: format!("configuration root must be a mapping, got {}", kind(&other)),
            }),
        }
    }

    /// Parses a YAML document into a tree. An empty document yields an empty tree.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })?;
        Self::from_value(value)
    }

    /// Reads and parses a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tree = Self::from_yaml(&contents)?;
        tracing::info!("Loaded configuration tree from: {}", path.display());
        Ok(tree)
    }

    /// Looks up a value by dotted path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Returns true if the dotted path resolves to a value.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Deserializes the value at `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.get(key).ok_or_else(|| ConfigError::SectionNotFound {
            key: key.to_string(),
        })?;
        T::deserialize(value).map_err(|e| ConfigError::invalid_value(key, e.to_string()))
    }

    /// Deserializes the value at `key`, falling back to `default` when the key
    /// is missing or holds an incompatible value.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    /// Returns the mapping at `key` as its own tree.
    pub fn section(&self, key: &str) -> Result<ConfigTree, ConfigError> {
        match self.get(key) {
            None => Err(ConfigError::SectionNotFound {
                key: key.to_string(),
            }),
            Some(Value::Object(map)) => Ok(Self { root: map.clone() }),
            Some(_) => Err(ConfigError::NotASection {
                key: key.to_string(),
            }),
        }
    }

    /// Sets a value by dotted path, creating intermediate mappings.
    ///
    /// Intermediate values that are not mappings are replaced.
    pub fn set(&mut self, key: &str, value: Value) {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };

        let mut current = &mut self.root;
        for part in parts {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just replaced with a mapping"),
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Returns a new tree with `overlay` deep-merged on top of `self`.
    ///
    /// Mappings merge key by key; any other value in the overlay replaces the
    /// base value.
    pub fn merged(&self, overlay: &ConfigTree) -> ConfigTree {
        let mut root = self.root.clone();
        merge_maps(&mut root, &overlay.root);
        Self { root }
    }

    /// Top-level keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Converts the tree back into a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(base_map)), Value::Object(overlay_map)) => {
                merge_maps(base_map, overlay_map);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
