//! The worker's local key/value cache.
//!
//! A single coarse mutex guards the whole map. Every operation is O(1) and
//! short, so the dispatcher, the remote fetcher and test observers can all
//! share one handle without lock ordering concerns.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// In-memory data store. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct DataStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any existing value.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.lock().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Removes `key` if present. Absence is not an error.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Insert every pair under a single lock acquisition.
    pub fn merge(&self, values: impl IntoIterator<Item = (String, Value)>) {
        let mut entries = self.entries.lock();
        for (key, value) in values {
            entries.insert(key, value);
        }
    }

    /// Keys from `keys` that are not currently stored.
    pub fn missing<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        let entries = self.entries.lock();
        keys.into_iter().filter(|k| !entries.contains_key(*k)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.lock().clone()
    }
}

impl From<HashMap<String, Value>> for DataStore {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore").field("len", &self.len()).finish()
    }
}
