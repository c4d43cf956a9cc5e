//! InMemoryStore - 開発用・テスト用の PersistenceStore
//!
//! Clones share the same map, so a test can keep one handle, drop the service
//! and build a new one on the same data to simulate a restart.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::app::tenant_table::lock;
use crate::ports::{PersistenceStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl PersistenceStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}
