use std::collections::HashMap;
use std::sync::RwLock;

use commons_error::BackendError;

use crate::{validate_key, StorageBackend};

/// In-memory backend, used by the tests and the demos
pub struct MemoryBackend {
    name: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Drop a blob, as if the provider had lost it
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.write().ok().and_then(|mut b| b.remove(key))
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        validate_key(&self.name, key)?;
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| BackendError::permanent(&self.name, "poisoned lock"))?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        validate_key(&self.name, key)?;
        let blobs = self
            .blobs
            .read()
            .map_err(|_| BackendError::permanent(&self.name, "poisoned lock"))?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::not_found(&self.name, key))
    }
}
