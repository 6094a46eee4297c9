use std::sync::Arc;

use crate::error::Result;
use crate::storage::Storage;

/// Storage facade that transparently prefixes all object names.
///
/// Each logical index sees its own namespace (`indexes/<name>/...`) without
/// knowing where it lives in the shared backend.
#[derive(Debug, Clone)]
pub struct PrefixedStorage {
    prefix: String,
    inner: Arc<dyn Storage>,
}

impl PrefixedStorage {
    /// Create a new prefixed storage namespace.
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Storage>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/').to_string();
        Self { prefix, inner }
    }

    /// The namespace prefix, without a trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn map_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(name);
        }
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

impl Storage for PrefixedStorage {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.inner.get(&self.map_name(name))
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        self.inner.put(&self.map_name(name), data)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(&self.map_name(name))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let names = self.inner.list(&self.map_name(prefix))?;
        Ok(names
            .iter()
            .filter_map(|name| self.strip_prefix(name))
            .map(str::to_string)
            .collect())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(&self.map_name(name))
    }
}
