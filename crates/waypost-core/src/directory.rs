use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::prefix::directory_key;
use crate::{AgentRecord, KvStore, StoreError};

/// Mapping of agent id to record for one environment prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directory {
    agents: BTreeMap<String, AgentRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: AgentRecord) -> Option<AgentRecord> {
        self.agents.insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &str) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AgentRecord> {
        self.agents.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<AgentRecord> {
        self.agents.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// Ids of every record idle for longer than `threshold_millis`.
    pub fn idle_agents(&self, now: u64, threshold_millis: u64) -> Vec<String> {
        self.agents
            .values()
            .filter(|record| record.is_idle(now, threshold_millis))
            .map(|record| record.id.clone())
            .collect()
    }
}

/// Persists one [`Directory`] document per prefix in a [`KvStore`].
///
/// Every mutation is a full read-modify-write of the document. Callers are
/// expected to funnel writes for a prefix through a single owner.
#[derive(Clone)]
pub struct DirectoryStore {
    store: Arc<dyn KvStore>,
}

impl DirectoryStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Loads the directory for `prefix`, empty if no document exists yet.
    pub fn load(&self, prefix: Option<&str>) -> Result<Directory, StoreError> {
        let key = directory_key(prefix);
        match self.store.get(&key)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { key, source })
            }
            None => Ok(Directory::new()),
        }
    }

    pub fn save(&self, prefix: Option<&str>, directory: &Directory) -> Result<(), StoreError> {
        let raw = serde_json::to_string(directory)?;
        self.store.set(&directory_key(prefix), &raw)
    }

    pub fn clear(&self, prefix: Option<&str>) -> Result<(), StoreError> {
        self.store.delete(&directory_key(prefix))
    }

    /// Read-modify-write of the whole document.
    pub fn update<T, F>(&self, prefix: Option<&str>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Directory) -> T,
    {
        let mut directory = self.load(prefix)?;
        let out = f(&mut directory);
        self.save(prefix, &directory)?;
        Ok(out)
    }

    /// Like [`update`](Self::update), but nothing is persisted if `f` returns `None`.
    pub fn update_if<T, F>(&self, prefix: Option<&str>, f: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(&mut Directory) -> Option<T>,
    {
        let mut directory = self.load(prefix)?;
        match f(&mut directory) {
            Some(out) => {
                self.save(prefix, &directory)?;
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    /// Prefixes that currently have a directory document.
    pub fn prefixes(&self) -> Result<Vec<Option<String>>, StoreError> {
        Ok(self
            .store
            .keys()?
            .iter()
            .filter_map(|key| crate::prefix::prefix_of_directory_key(key))
            .collect())
    }
}
