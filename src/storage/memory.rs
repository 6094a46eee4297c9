//! In-memory storage implementation for testing and ephemeral indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::{Storage, StorageError, validate_name};

/// An in-memory blob store.
///
/// Objects are kept as shared immutable byte slices, so a `get` never blocks
/// a concurrent `put` for longer than the map update.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, Arc<[u8]>>>,
}

impl MemoryStorage {
    /// Create an empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of objects stored.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read();
        let data = objects
            .get(name)
            .ok_or_else(|| StorageError::ObjectNotFound(name.to_string()))?;
        Ok(data.to_vec())
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.objects.write().insert(name.to_string(), Arc::from(data));
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.objects.write().remove(name);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(name))
    }
}
