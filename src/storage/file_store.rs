//! File Storage Abstraction
//!
//! Trait-based access to the directory holding the persisted document,
//! following the WAL store pattern: a writer with explicit `sync`, plus
//! directory-level `sync_dir` and `rename`.
//!
//! ## Implementations
//!
//! - `InMemoryFileStore`: For unit tests and DST (tracks synced length)
//! - `LocalFileStore`: For production (std::fs::File + sync_all)
//! - `SimulatedFileStore`: For DST with fault injection (see `simulated.rs`)

use super::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for one freshly created file
pub trait FileWriter: Send {
    /// Append all of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError>;
    /// Fsync the file contents and metadata
    fn sync(&mut self) -> Result<(), StorageError>;
}

/// Directory of named files
pub trait FileStore: Send + Sync + 'static {
    type Writer: FileWriter;

    /// Create or truncate a file for writing
    fn create(&self, name: &str) -> Result<Self::Writer, StorageError>;
    /// Read a whole file; `Ok(None)` when it does not exist
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Atomically replace `to` with `from`
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;
    /// Delete a file; missing files are not an error
    fn remove(&self, name: &str) -> Result<(), StorageError>;
    /// Fsync the directory entry table
    fn sync_dir(&self) -> Result<(), StorageError>;
    fn exists(&self, name: &str) -> Result<bool, StorageError>;
}

// ============================================================================
// InMemoryFileStore - For unit tests and DST
// ============================================================================

#[derive(Debug, Clone, Default)]
struct InMemoryFile {
    data: Vec<u8>,
    /// Bytes that would survive a crash
    synced_len: usize,
}

/// In-memory file store for unit tests and deterministic simulation.
///
/// Renames are applied to the namespace immediately and survive a
/// simulated crash; file contents survive only up to the last `sync`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStore {
    files: Arc<Mutex<HashMap<String, InMemoryFile>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of a file (for tests)
    pub fn get_file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|f| f.data.clone())
    }

    /// Replace the raw bytes of a file as if synced (for tests)
    pub fn set_file_data(&self, name: &str, data: Vec<u8>) {
        let synced_len = data.len();
        self.files
            .lock()
            .insert(name.to_string(), InMemoryFile { data, synced_len });
    }

    /// Truncate a file (crash/corruption simulation)
    pub fn truncate_file(&self, name: &str, len: usize) {
        if let Some(file) = self.files.lock().get_mut(name) {
            file.data.truncate(len);
            file.synced_len = file.synced_len.min(len);
        }
    }

    /// Simulate a crash: un-synced bytes are lost
    pub fn simulate_crash(&self) {
        for file in self.files.lock().values_mut() {
            file.data.truncate(file.synced_len);
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

/// In-memory file writer
pub struct InMemoryFileWriter {
    name: String,
    files: Arc<Mutex<HashMap<String, InMemoryFile>>>,
}

impl FileWriter for InMemoryFileWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(&self.name)
            .ok_or_else(|| StorageError::NotFound(self.name.clone()))?;
        file.data.extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.files.lock().get_mut(&self.name) {
            file.synced_len = file.data.len();
        }
        Ok(())
    }
}

impl FileStore for InMemoryFileStore {
    type Writer = InMemoryFileWriter;

    fn create(&self, name: &str) -> Result<Self::Writer, StorageError> {
        debug_assert!(!name.is_empty(), "Precondition: name must not be empty");

        self.files
            .lock()
            .insert(name.to_string(), InMemoryFile::default());
        Ok(InMemoryFileWriter {
            name: name.to_string(),
            files: Arc::clone(&self.files),
        })
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.files.lock().get(name).map(|f| f.data.clone()))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let mut files = self.files.lock();
        let file = files
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), file);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn sync_dir(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.files.lock().contains_key(name))
    }
}

// ============================================================================
// LocalFileStore - For production
// ============================================================================

/// Local filesystem store using std::fs::File + sync_all()
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    /// Create a store rooted at `dir`. Creates the directory if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(LocalFileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// Local filesystem file writer
pub struct LocalFileWriter {
    file: std::fs::File,
}

impl FileWriter for LocalFileWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(data).map_err(StorageError::from)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::FsyncFailed(e.to_string()))
    }
}

impl FileStore for LocalFileStore {
    type Writer = LocalFileWriter;

    fn create(&self, name: &str) -> Result<Self::Writer, StorageError> {
        debug_assert!(!name.is_empty(), "Precondition: name must not be empty");

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.file_path(name))?;
        Ok(LocalFileWriter { file })
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.file_path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        std::fs::rename(self.file_path(from), self.file_path(to))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), StorageError> {
        std::fs::File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StorageError::FsyncFailed(format!("{}: {}", self.dir.display(), e)))
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.file_path(name).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inmemory_crash_drops_unsynced() {
        let store = InMemoryFileStore::new();
        let mut w = store.create("f").unwrap();
        w.write_all(b"durable").unwrap();
        w.sync().unwrap();
        w.write_all(b"-lost").unwrap();

        store.simulate_crash();
        assert_eq!(store.get_file_data("f").unwrap(), b"durable");
    }

    #[test]
    fn test_inmemory_rename_replaces_target() {
        let store = InMemoryFileStore::new();
        store.set_file_data("a", b"new".to_vec());
        store.set_file_data("b", b"old".to_vec());
        store.rename("a", "b").unwrap();

        assert!(!store.exists("a").unwrap());
        assert_eq!(store.read("b").unwrap().unwrap(), b"new");
    }

    #[test]
    fn test_inmemory_rename_missing_source() {
        let store = InMemoryFileStore::new();
        assert!(matches!(store.rename("nope", "b"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_localfs_write_read_rename() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();

        let mut w = store.create("doc.tmp").unwrap();
        w.write_all(b"{}").unwrap();
        w.sync().unwrap();
        store.sync_dir().unwrap();
        drop(w);
        store.rename("doc.tmp", "doc").unwrap();

        assert_eq!(store.read("doc").unwrap().unwrap(), b"{}");
        assert!(store.read("doc.tmp").unwrap().is_none());
    }

    #[test]
    fn test_localfs_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path()).unwrap();
        store.remove("never-existed").unwrap();
    }
}
