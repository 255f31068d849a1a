//! String-keyed capability registry.
//!
//! Triggers (and any other pluggable capability) are looked up by the type
//! name stored on the workflow row.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use log::warn;

/// A registry mapping type names to shared implementations.
pub struct Registry<T: Clone> {
    entries: RwLock<BTreeMap<String, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `value` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, value: T) {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(name.clone(), value).is_some() {
            warn!("Replacing registered implementation for '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_lookup() {
        let registry: Registry<Arc<str>> = Registry::new();
        registry.register("interval", Arc::from("a"));
        registry.register("collection", Arc::from("b"));

        assert_eq!(registry.get("interval").as_deref(), Some("a"));
        assert!(registry.get("collection").is_some());
        assert!(registry.get("webhook").is_none());
        assert_eq!(registry.names(), vec!["collection", "interval"]);
    }

    #[test]
    fn test_register_replaces() {
        let registry: Registry<u8> = Registry::default();
        registry.register("interval", 1);
        registry.register("interval", 2);
        assert_eq!(registry.get("interval"), Some(2));
    }
}
