//! Error types for the AirBorne simulator core.
//!
//! Configuration and bootstrap failures are described here. Plugin lifecycle
//! errors live in `airborne-plugin-api` next to the loader that raises them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AirborneError as the error type.
pub type Result<T> = std::result::Result<T, AirborneError>;

/// Top-level error type for core operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum AirborneError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading, querying or validating configuration.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing configuration section
    #[error("Configuration section not found: {key}")]
    SectionNotFound { key: String },

    /// Key exists but does not hold a mapping
    #[error("Configuration key is not a section: {key}")]
    NotASection { key: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
