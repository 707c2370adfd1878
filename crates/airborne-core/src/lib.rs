//! # AirBorne Core
//!
//! Configuration and error handling shared by the AirBorne plugin runtime and
//! the bootstrap binary.
//!
//! - **Errors**: `thiserror` based error types for configuration failures.
//! - **Configuration**: `AppConfig`, loaded from YAML files with environment
//!   variable overrides and validation.
//! - **Configuration tree**: `ConfigTree`, the read-only settings tree that
//!   every plugin receives through its context.
//!
//! ## Example
//!
//! ```
//! use airborne_core::config::AppConfig;
//!
//! let config = AppConfig::from_yaml("simulation:\n  physics_hz: 120\n").unwrap();
//! assert_eq!(config.simulation.physics_hz, 120);
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod tree;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use error::{AirborneError, ConfigError, Result};
pub use tree::ConfigTree;
