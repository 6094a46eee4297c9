//! Directory-backed storage implementation.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{QuiverError, Result};
use crate::storage::{Storage, StorageError, validate_name};

const TEMP_SUFFIX: &str = ".tmp";

/// A storage backend rooted at a local directory.
///
/// Object names map to relative paths; `/` separators become nested
/// directories. Every `put` writes a uniquely named temp file, syncs it and
/// renames it over the target, so readers never see a torn object.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a file storage in the given directory.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            fs::create_dir_all(&directory)
                .map_err(|e| QuiverError::storage(format!("Failed to create directory: {e}")))?;
        }

        if !directory.is_dir() {
            return Err(QuiverError::storage(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        Ok(FileStorage { directory })
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.directory.join(name))
    }

    fn collect(&self, dir: &Path, relative: &str, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::Backend(e.to_string()).into()),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let name = if relative.is_empty() {
                file_name.clone()
            } else {
                format!("{relative}/{file_name}")
            };
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, &name, out)?;
            } else if !file_name.ends_with(TEMP_SUFFIX) {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(name.to_string()).into())
            }
            Err(e) => Err(StorageError::Backend(format!("Failed to read {name}: {e}")).into()),
        }
    }

    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_file_name(format!(
            ".{}{}",
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            QuiverError::from(StorageError::Backend(format!("Failed to publish {name}: {e}")))
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Backend(format!("Failed to delete {name}: {e}")).into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.collect(&self.directory, "", &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.object_path(name)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_put_and_get_nested() {
        let (temp_dir, storage) = create_test_storage();

        storage.put("indexes/docs/manifest.json", b"{}").unwrap();
        assert_eq!(storage.get("indexes/docs/manifest.json").unwrap(), b"{}".to_vec());
        assert!(temp_dir.path().join("indexes/docs/manifest.json").is_file());
    }

    #[test]
    fn test_put_replaces_and_leaves_no_temp_files() {
        let (_temp_dir, storage) = create_test_storage();

        storage.put("a.bin", b"first").unwrap();
        storage.put("a.bin", b"second").unwrap();
        assert_eq!(storage.get("a.bin").unwrap(), b"second".to_vec());
        assert_eq!(storage.list("").unwrap(), vec!["a.bin".to_string()]);
    }

    #[test]
    fn test_list_with_prefix() {
        let (_temp_dir, storage) = create_test_storage();

        storage.put("x/segments/2.seg", b"2").unwrap();
        storage.put("x/segments/1.seg", b"1").unwrap();
        storage.put("y/segments/1.seg", b"1").unwrap();

        assert_eq!(
            storage.list("x/").unwrap(),
            vec!["x/segments/1.seg".to_string(), "x/segments/2.seg".to_string()]
        );
    }

    #[test]
    fn test_missing_object() {
        let (_temp_dir, storage) = create_test_storage();

        assert!(!storage.exists("nope").unwrap());
        assert!(storage.get("nope").is_err());
        storage.delete("nope").unwrap();
    }
}
