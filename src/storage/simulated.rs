//! Simulated File Store with Fault Injection
//!
//! DST wrapper around `InMemoryFileStore`. Every decision point draws from a
//! seeded RNG, so a failing seed replays the exact same fault sequence.

use super::file_store::{FileStore, FileWriter, InMemoryFileStore, InMemoryFileWriter};
use super::StorageError;
use crate::simulator::DeterministicRng;
use parking_lot::Mutex;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedFileStoreConfig {
    /// Probability of write failure (nothing written)
    pub write_fail_prob: f64,
    /// Probability of partial write (prefix written, then error)
    pub partial_write_prob: f64,
    /// Probability of fsync failure
    pub fsync_fail_prob: f64,
    /// Probability of directory fsync failure
    pub dir_sync_fail_prob: f64,
    /// Probability of rename failure
    pub rename_fail_prob: f64,
    /// Probability of disk full error
    pub disk_full_prob: f64,
}

impl Default for SimulatedFileStoreConfig {
    fn default() -> Self {
        SimulatedFileStoreConfig {
            write_fail_prob: 0.01,
            partial_write_prob: 0.005,
            fsync_fail_prob: 0.005,
            dir_sync_fail_prob: 0.005,
            rename_fail_prob: 0.01,
            disk_full_prob: 0.001,
        }
    }
}

impl SimulatedFileStoreConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedFileStoreConfig {
            write_fail_prob: 0.0,
            partial_write_prob: 0.0,
            fsync_fail_prob: 0.0,
            dir_sync_fail_prob: 0.0,
            rename_fail_prob: 0.0,
            disk_full_prob: 0.0,
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedFileStoreConfig {
            write_fail_prob: 0.05,
            partial_write_prob: 0.05,
            fsync_fail_prob: 0.05,
            dir_sync_fail_prob: 0.02,
            rename_fail_prob: 0.05,
            disk_full_prob: 0.01,
        }
    }

    /// Every rename fails (flush never reaches the primary file)
    pub fn rename_always_fails() -> Self {
        SimulatedFileStoreConfig {
            rename_fail_prob: 1.0,
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedFileStoreStats {
    pub write_attempts: u64,
    pub write_failures: u64,
    pub partial_writes: u64,
    pub sync_attempts: u64,
    pub sync_failures: u64,
    pub rename_attempts: u64,
    pub rename_failures: u64,
    pub disk_full_errors: u64,
}

struct SimulatedState {
    rng: DeterministicRng,
    config: SimulatedFileStoreConfig,
    stats: SimulatedFileStoreStats,
}

/// Simulated file store wrapping `InMemoryFileStore` with fault injection
#[derive(Clone)]
pub struct SimulatedFileStore {
    inner: InMemoryFileStore,
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedFileStore {
    pub fn new(seed: u64, config: SimulatedFileStoreConfig) -> Self {
        SimulatedFileStore {
            inner: InMemoryFileStore::new(),
            state: Arc::new(Mutex::new(SimulatedState {
                rng: DeterministicRng::new(seed),
                config,
                stats: SimulatedFileStoreStats::default(),
            })),
        }
    }

    /// Swap the fault configuration (e.g. heal the disk before a retry)
    pub fn set_config(&self, config: SimulatedFileStoreConfig) {
        self.state.lock().config = config;
    }

    pub fn stats(&self) -> SimulatedFileStoreStats {
        self.state.lock().stats.clone()
    }

    /// The underlying in-memory store (for crash simulation)
    pub fn inner_store(&self) -> &InMemoryFileStore {
        &self.inner
    }
}

/// Simulated file writer with fault injection
pub struct SimulatedFileWriter {
    inner: InMemoryFileWriter,
    state: Arc<Mutex<SimulatedState>>,
}

impl FileWriter for SimulatedFileWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        {
            let mut s = self.state.lock();
            let config = s.config.clone();
            s.stats.write_attempts = s.stats.write_attempts.saturating_add(1);

            if s.rng.gen_bool(config.disk_full_prob) {
                s.stats.disk_full_errors = s.stats.disk_full_errors.saturating_add(1);
                return Err(StorageError::DiskFull);
            }

            if s.rng.gen_bool(config.write_fail_prob) {
                s.stats.write_failures = s.stats.write_failures.saturating_add(1);
                return Err(StorageError::Io(IoError::new(
                    ErrorKind::Other,
                    "simulated write failure",
                )));
            }

            // Partial write: a prefix lands, the caller sees an error
            if data.len() > 1 && s.rng.gen_bool(config.partial_write_prob) {
                s.stats.partial_writes = s.stats.partial_writes.saturating_add(1);
                let partial_len = s.rng.gen_range(1, data.len() as u64) as usize;
                drop(s);
                let _ = self.inner.write_all(&data[..partial_len]);
                return Err(StorageError::PartialWrite {
                    expected: data.len(),
                    actual: partial_len,
                });
            }
        }

        self.inner.write_all(data)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        {
            let mut s = self.state.lock();
            let prob = s.config.fsync_fail_prob;
            s.stats.sync_attempts = s.stats.sync_attempts.saturating_add(1);
            if s.rng.gen_bool(prob) {
                s.stats.sync_failures = s.stats.sync_failures.saturating_add(1);
                return Err(StorageError::FsyncFailed("simulated fsync failure".to_string()));
            }
        }
        self.inner.sync()
    }
}

impl FileStore for SimulatedFileStore {
    type Writer = SimulatedFileWriter;

    fn create(&self, name: &str) -> Result<Self::Writer, StorageError> {
        Ok(SimulatedFileWriter {
            inner: self.inner.create(name)?,
            state: Arc::clone(&self.state),
        })
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        {
            let mut s = self.state.lock();
            let prob = s.config.rename_fail_prob;
            s.stats.rename_attempts = s.stats.rename_attempts.saturating_add(1);
            if s.rng.gen_bool(prob) {
                s.stats.rename_failures = s.stats.rename_failures.saturating_add(1);
                return Err(StorageError::Io(IoError::new(
                    ErrorKind::Other,
                    "simulated rename failure",
                )));
            }
        }
        self.inner.rename(from, to)
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.inner.remove(name)
    }

    fn sync_dir(&self) -> Result<(), StorageError> {
        let mut s = self.state.lock();
        let prob = s.config.dir_sync_fail_prob;
        s.stats.sync_attempts = s.stats.sync_attempts.saturating_add(1);
        if s.rng.gen_bool(prob) {
            s.stats.sync_failures = s.stats.sync_failures.saturating_add(1);
            return Err(StorageError::FsyncFailed(
                "simulated directory fsync failure".to_string(),
            ));
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.exists(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_behaves_like_inner() {
        let store = SimulatedFileStore::new(7, SimulatedFileStoreConfig::no_faults());
        let mut w = store.create("f").unwrap();
        w.write_all(b"abc").unwrap();
        w.sync().unwrap();
        store.rename("f", "g").unwrap();
        assert_eq!(store.read("g").unwrap().unwrap(), b"abc");
        assert_eq!(store.stats().rename_failures, 0);
    }

    #[test]
    fn test_rename_always_fails() {
        let store = SimulatedFileStore::new(1, SimulatedFileStoreConfig::rename_always_fails());
        store.inner_store().set_file_data("f", b"x".to_vec());
        assert!(store.rename("f", "g").is_err());
        assert_eq!(store.stats().rename_failures, 1);

        store.set_config(SimulatedFileStoreConfig::no_faults());
        store.rename("f", "g").unwrap();
    }

    #[test]
    fn test_same_seed_same_faults() {
        let run = |seed| {
            let store = SimulatedFileStore::new(seed, SimulatedFileStoreConfig::high_chaos());
            (0..200)
                .map(|i| {
                    let name = format!("f{}", i);
                    store
                        .create(&name)
                        .and_then(|mut w| w.write_all(b"0123456789"))
                        .is_ok()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }
}
