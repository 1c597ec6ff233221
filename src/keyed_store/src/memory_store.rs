use crate::SimpleKeyValueStore;
use kvfs_lib::{FsError, FsResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Simple store held entirely in memory. The default backend for tests and
/// for throwaway filesystems.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Full copy of the store contents, for equivalence checks in tests.
    pub fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.entries.lock().unwrap().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleKeyValueStore for MemoryStore {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn clear(&self) -> FsResult<()> {
        self.entries
            .lock()
            .map_err(|e| FsError::DbError(format!("store lock poisoned: {}", e)))?
            .clear();
        Ok(())
    }

    fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| FsError::DbError(format!("store lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| FsError::DbError(format!("store lock poisoned: {}", e)))?;
        if !overwrite && entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn del(&self, key: &str) -> FsResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| FsError::DbError(format!("store lock poisoned: {}", e)))?;
        entries.remove(key);
        Ok(())
    }
}
