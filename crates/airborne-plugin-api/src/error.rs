use thiserror::Error;

/// Plugin runtime error types
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin not loaded: {0}")]
    NotLoaded(String),

    #[error("Plugin metadata not found: {0}")]
    MissingMetadata(String),

    #[error("Circular dependency detected in plugins: {}", remaining.join(", "))]
    CircularDependency { remaining: Vec<String> },

    #[error("Failed to load dependency {dependency} for {plugin}: {source}")]
    DependencyFailed {
        dependency: String,
        plugin: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error("Failed to initialize plugin {name}: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("Invalid plugin metadata for {name}: {reason}")]
    InvalidMetadata { name: String, reason: String },

    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PluginError {
    /// Returns true for failures in the dependency graph rather than in the
    /// named plugin itself.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            PluginError::CircularDependency { .. }
                | PluginError::MissingMetadata(_)
                | PluginError::DependencyFailed { .. }
        )
    }

    /// Returns true when the named plugin could not be found, instantiated or
    /// initialized.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            PluginError::NotFound(_) | PluginError::NotLoaded(_) | PluginError::InitFailed { .. }
        )
    }

    /// Follows `DependencyFailed` wrappers down to the original failure.
    pub fn root_cause(&self) -> &PluginError {
        let mut current = self;
        while let PluginError::DependencyFailed { source, .. } = current {
            current = source;
        }
        current
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Component registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Component already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Component not registered: {0}")]
    NotRegistered(String),

    #[error("Component {name} is a {actual}, not a {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Extracts the message carried by a caught panic.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
