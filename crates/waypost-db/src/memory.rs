use std::collections::HashMap;
use std::sync::RwLock;

use waypost_core::{KvStore, StoreError};

/// Process-local document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.docs.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.docs
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.docs.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.docs.read().map_err(poisoned)?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("dev-service").unwrap(), None);
        store.set("dev-service", "{}").unwrap();
        store.set("service", "{}").unwrap();
        assert_eq!(store.get("dev-service").unwrap().as_deref(), Some("{}"));
        assert_eq!(store.keys().unwrap(), vec!["dev-service", "service"]);
        store.delete("dev-service").unwrap();
        store.delete("dev-service").unwrap();
        assert_eq!(store.get("dev-service").unwrap(), None);
    }
}
