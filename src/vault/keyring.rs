//! Keyring contract for the master wrapping key
//!
//! The key-management service itself lives outside this crate. `InMemoryKeyring`
//! is the implementation used by tests, DST and the inspector binary.

use super::cipher::KEY_LEN;
use super::CryptoError;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroizing;

/// External key-management service
pub trait Keyring: Send + Sync {
    /// Whether the service is loaded and usable
    fn available(&self) -> bool;

    /// Read a secret by id. `Ok(None)` when no such secret exists.
    fn read_secret(&self, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError>;

    /// Generate a new AES-256 secret under `id`
    fn generate(&self, id: &str) -> Result<(), CryptoError>;
}

/// In-memory keyring
#[derive(Debug)]
pub struct InMemoryKeyring {
    secrets: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
    available: AtomicBool,
}

impl InMemoryKeyring {
    pub fn new() -> Self {
        InMemoryKeyring {
            secrets: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// A keyring that reports itself as not loaded
    pub fn unavailable() -> Self {
        let keyring = Self::new();
        keyring.set_available(false);
        keyring
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn insert(&self, id: &str, secret: &[u8]) {
        self.secrets
            .write()
            .insert(id.to_string(), Zeroizing::new(secret.to_vec()));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.secrets.write().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.secrets.read().contains_key(id)
    }
}

impl Default for InMemoryKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyring for InMemoryKeyring {
    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn read_secret(&self, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        if !self.available() {
            return Err(CryptoError::KeyringUnavailable);
        }
        Ok(self.secrets.read().get(id).cloned())
    }

    fn generate(&self, id: &str) -> Result<(), CryptoError> {
        if !self.available() {
            return Err(CryptoError::KeyringUnavailable);
        }
        let mut secret = Zeroizing::new(vec![0u8; KEY_LEN]);
        OsRng.fill_bytes(secret.as_mut_slice());
        self.secrets.write().insert(id.to_string(), secret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_read() {
        let keyring = InMemoryKeyring::new();
        assert!(keyring.read_secret("k").unwrap().is_none());

        keyring.generate("k").unwrap();
        let secret = keyring.read_secret("k").unwrap().unwrap();
        assert_eq!(secret.len(), KEY_LEN);
    }

    #[test]
    fn test_unavailable_keyring_refuses() {
        let keyring = InMemoryKeyring::unavailable();
        assert!(!keyring.available());
        assert!(matches!(keyring.read_secret("k"), Err(CryptoError::KeyringUnavailable)));
        assert!(matches!(keyring.generate("k"), Err(CryptoError::KeyringUnavailable)));
    }
}
