//! Name-keyed service locator for capabilities plugins expose to each other.

use parking_lot::RwLock;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RegistryError, RegistryResult};

struct Component {
    instance: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Shared registry of named components.
///
/// Components are stored type-erased and retrieved as typed `Arc<T>` handles.
/// The registry does not own component lifecycles; unregistering only drops
/// the registry's reference.
///
/// ```
/// use airborne_plugin_api::ComponentRegistry;
/// use std::sync::Arc;
///
/// struct Battery { volts: f64 }
///
/// let registry = ComponentRegistry::new();
/// registry.register("electrical", Arc::new(Battery { volts: 28.0 })).unwrap();
///
/// let battery = registry.get::<Battery>("electrical").unwrap();
/// assert_eq!(battery.volts, 28.0);
/// assert!(registry.get::<String>("electrical").is_err());
/// ```
#[derive(Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&self, name: impl Into<String>, component: Arc<T>) -> RegistryResult<()>
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        let mut components = self.components.write();
        if components.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        tracing::info!("Registered component: {} ({})", name, type_name::<T>());
        components.insert(
            name,
            Component {
                instance: component,
                type_name: type_name::<T>(),
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> RegistryResult<()> {
        match self.components.write().remove(name) {
            Some(_) => {
                tracing::info!("Unregistered component: {}", name);
                Ok(())
            }
            None => Err(RegistryError::NotRegistered(name.to_string())),
        }
    }

    pub fn get<T>(&self, name: &str) -> RegistryResult<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let components = self.components.read();
        let component = components
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        component
            .instance
            .clone()
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
                actual: component.type_name,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.components.write().clear();
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WeightAndBalance {
        gross_weight_kg: f64,
    }

    #[test]
    fn test_register_and_get() {
        let registry = ComponentRegistry::new();
        let wb = Arc::new(WeightAndBalance {
            gross_weight_kg: 61_000.0,
        });
        registry.register("weight_balance_system", wb.clone()).unwrap();

        let fetched = registry.get::<WeightAndBalance>("weight_balance_system").unwrap();
        assert!(Arc::ptr_eq(&wb, &fetched));
        assert_eq!(fetched.gross_weight_kg, 61_000.0);
        assert!(registry.contains("weight_balance_system"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = ComponentRegistry::new();
        registry.register("electrical", Arc::new(1u32)).unwrap();
        assert_eq!(
            registry.register("electrical", Arc::new(2u32)),
            Err(RegistryError::AlreadyRegistered("electrical".to_string()))
        );
        assert_eq!(*registry.get::<u32>("electrical").unwrap(), 1);
    }

    #[test]
    fn test_type_mismatch() {
        let registry = ComponentRegistry::new();
        registry.register("fuel", Arc::new(String::from("jet-a"))).unwrap();

        match registry.get::<u32>("fuel") {
            Err(RegistryError::TypeMismatch {
                name,
                expected,
                actual,
            }) => {
                assert_eq!(name, "fuel");
                assert_eq!(expected, "u32");
                assert_eq!(actual, type_name::<String>());
            }
            other => panic!("expected type mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unregister() {
        let registry = ComponentRegistry::new();
        assert_eq!(
            registry.unregister("missing"),
            Err(RegistryError::NotRegistered("missing".to_string()))
        );

        registry.register("tcas", Arc::new(())).unwrap();
        registry.unregister("tcas").unwrap();
        assert!(registry.get::<()>("tcas").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_components_sorted() {
        let registry = ComponentRegistry::new();
        for name in ["fuel", "autopilot", "engine"] {
            registry.register(name, Arc::new(())).unwrap();
        }
        assert_eq!(registry.list_components(), vec!["autopilot", "engine", "fuel"]);

        registry.clear();
        assert!(registry.list_components().is_empty());
    }
}
