//! Durable storage for the persisted-variables document
//!
//! `FileStore` abstracts the directory holding the primary file and its
//! shadow; `DurableFile` runs the write-shadow, fsync, rename protocol on top
//! of any store.

mod durable;
mod file_store;
mod simulated;

pub use durable::{DurableFile, Loaded, SHADOW_SUFFIX};
pub use file_store::{
    FileStore, FileWriter, InMemoryFileStore, InMemoryFileWriter, LocalFileStore, LocalFileWriter,
};
pub use simulated::{
    SimulatedFileStore, SimulatedFileStoreConfig, SimulatedFileStoreStats, SimulatedFileWriter,
};

/// Storage-layer failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("fsync failed: {0}")]
    FsyncFailed(String),
    #[error("partial write: expected {expected} bytes, wrote {actual}")]
    PartialWrite { expected: usize, actual: usize },
    #[error("disk full")]
    DiskFull,
}
