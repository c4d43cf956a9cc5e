//! JsonFileStore - a PersistenceStore backed by a single JSON file.
//!
//! The whole map is rewritten on every mutation (write to a temp file, then
//! rename), which is fine for the handful of tenants a host carries.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::app::tenant_table::lock;
use crate::ports::{PersistenceStore, StoreError};

pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens (or lazily creates) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), rows = entries.len(), "opened json store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Other(e.to_string()))?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let entries = lock(&self.entries);
        self.write(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put("A", r#"{"appUrl":"https://a"}"#).unwrap();
        store.put("B", "{}").unwrap();
        store.remove("B").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["A".to_string()]);
        assert_eq!(
            reopened.get("A").unwrap().as_deref(),
            Some(r#"{"appUrl":"https://a"}"#)
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn missing_file_starts_empty_and_flush_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());
        store.flush().unwrap();
        assert!(path.exists());
    }
}
