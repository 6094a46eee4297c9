//! Blob storage abstraction for Quiver.
//!
//! The engine persists everything it owns (index descriptors, manifests,
//! sealed segments and built ANN structures) as opaque named blobs. Backends
//! only need whole-object `get`/`put`/`delete`/`list`; nothing is ever updated
//! in place. A `put` must be visible to a subsequent `get` or `list` from the
//! same process.
//!
//! # Backends
//!
//! - [`memory::MemoryStorage`]: process-local map, used by tests and ephemeral indexes.
//! - [`file::FileStorage`]: a directory tree; puts go through a temp file and a rename.
//! - [`prefixed::PrefixedStorage`]: namespaces another backend under a fixed prefix.
//!
//! # Example
//!
//! ```
//! use quiver::storage::memory::MemoryStorage;
//! use quiver::storage::Storage;
//!
//! # fn main() -> quiver::error::Result<()> {
//! let storage = MemoryStorage::new();
//! storage.put("segments/1.seg", b"payload")?;
//! assert_eq!(storage.get("segments/1.seg")?, b"payload".to_vec());
//! assert_eq!(storage.list("segments/")?, vec!["segments/1.seg".to_string()]);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use crate::error::QuiverError;

pub mod file;
pub mod memory;
pub mod prefixed;

/// A trait for blob storage backends.
///
/// Names are `/`-separated relative paths. Implementations must be safe to
/// share between threads.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Read a whole object.
    ///
    /// Fails with [`StorageError::ObjectNotFound`] when the object is absent.
    fn get(&self, name: &str) -> crate::error::Result<Vec<u8>>;

    /// Write a whole object, replacing any previous content.
    fn put(&self, name: &str, data: &[u8]) -> crate::error::Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    fn delete(&self, name: &str) -> crate::error::Result<()>;

    /// List object names starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> crate::error::Result<Vec<String>>;

    /// Check whether an object exists.
    fn exists(&self, name: &str) -> crate::error::Result<bool>;

    /// Read an object, mapping absence to `None`.
    fn try_get(&self, name: &str) -> crate::error::Result<Option<Vec<u8>>> {
        if self.exists(name)? {
            self.get(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Storage-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Object not found.
    ObjectNotFound(String),
    /// Object name rejected by the backend.
    InvalidName(String),
    /// Backend I/O failure.
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ObjectNotFound(name) => write!(f, "Object not found: {name}"),
            StorageError::InvalidName(name) => write!(f, "Invalid object name: {name}"),
            StorageError::Backend(msg) => write!(f, "Backend failure: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for QuiverError {
    fn from(err: StorageError) -> Self {
        QuiverError::storage(err.to_string())
    }
}

/// Reject names that could escape a backend root.
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
