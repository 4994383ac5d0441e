//! Shadow-file write protocol
//!
//! ```text
//! flush:  create <file>.backup -> write -> fsync -> fsync dir -> close
//!         -> rename <file>.backup over <file> -> fsync dir
//! load:   <file>.backup parses?  yes -> rename over <file>, return it
//!                                no  -> remove it, parse <file>
//! ```
//!
//! Readers never observe a half-written primary: the primary is only ever
//! replaced by a rename of a fully synced shadow.

use super::file_store::{FileStore, FileWriter};
use super::StorageError;
use tracing::{debug, info, warn};

/// Suffix appended to the primary file name to form the shadow name
pub const SHADOW_SUFFIX: &str = ".backup";

/// A successfully loaded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    pub value: T,
    /// True when an interrupted flush was completed during this load
    pub recovered_from_shadow: bool,
}

/// Primary file plus its shadow, on top of a `FileStore`
pub struct DurableFile<S: FileStore> {
    store: S,
    primary: String,
    shadow: String,
}

impl<S: FileStore> DurableFile<S> {
    pub fn new(store: S, primary: impl Into<String>) -> Self {
        let primary = primary.into();
        debug_assert!(!primary.is_empty(), "Precondition: file name must not be empty");
        let shadow = format!("{}{}", primary, SHADOW_SUFFIX);
        DurableFile {
            store,
            primary,
            shadow,
        }
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    pub fn shadow_name(&self) -> &str {
        &self.shadow
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically replace the primary file with `bytes`.
    ///
    /// On error the primary is untouched; a leftover shadow is either
    /// incomplete (discarded by the next load) or complete (promoted by it).
    pub fn flush(&self, bytes: &[u8]) -> Result<(), StorageError> {
        {
            let mut writer = self.store.create(&self.shadow)?;
            writer.write_all(bytes)?;
            writer.sync()?;
            self.store.sync_dir()?;
        }

        self.store.rename(&self.shadow, &self.primary)?;
        self.store.sync_dir()?;

        debug!(file = %self.primary, bytes = bytes.len(), "flushed persisted variables");
        Ok(())
    }

    /// Read the current document, completing an interrupted flush first.
    ///
    /// Returns `Ok(None)` when neither file exists. A primary that fails to
    /// parse is an error: there is no older copy to fall back to.
    pub fn load<T, E, F>(&self, parse: F) -> Result<Option<Loaded<T>>, E>
    where
        F: Fn(&[u8]) -> Result<T, E>,
        E: From<StorageError> + std::fmt::Display,
    {
        if let Some(bytes) = self.store.read(&self.shadow)? {
            match parse(&bytes) {
                Ok(value) => {
                    info!(
                        shadow = %self.shadow,
                        primary = %self.primary,
                        "completing interrupted flush from shadow file"
                    );
                    self.store.rename(&self.shadow, &self.primary)?;
                    self.store.sync_dir()?;
                    return Ok(Some(Loaded {
                        value,
                        recovered_from_shadow: true,
                    }));
                }
                Err(e) => {
                    warn!(shadow = %self.shadow, error = %e, "discarding stale shadow file");
                    self.store.remove(&self.shadow)?;
                    self.store.sync_dir()?;
                }
            }
        }

        match self.store.read(&self.primary)? {
            Some(bytes) => Ok(Some(Loaded {
                value: parse(&bytes)?,
                recovered_from_shadow: false,
            })),
            None => Ok(None),
        }
    }

    /// Raw bytes of the primary file, if any
    pub fn read_primary(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.read(&self.primary)
    }
}
