//! Sensitive Vault
//!
//! Envelope encryption for sensitive variables:
//!
//! ```text
//! keyring[master_key_id] ──wraps──> file key ──seals──> sensitive sections
//! ```
//!
//! The master key never leaves the keyring's control beyond a single call.
//! The file key is generated locally, stored only in wrapped form
//! (`KeyMaterial`) and unwrapped per operation.

pub mod cipher;
pub mod keyring;

pub use cipher::{AesKey, AES_256_CBC};
pub use keyring::{InMemoryKeyring, Keyring};

use crate::codec::{self, ParseError, SensitiveSections};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors from the sensitive envelope
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("keyring service is not available")]
    KeyringUnavailable,
    #[error("master key '{id}' not found in keyring")]
    MasterKeyMissing { id: String },
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("unsupported encryption algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("field '{field}' is not valid hex: {source}")]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("key material is missing the wrapped file key")]
    NoFileKey,
    #[error("decrypted sensitive sections are malformed: {0}")]
    Fragment(#[from] ParseError),
}

/// Durable key material written into `mysql_sensitive_variables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub master_key_id: String,
    /// Hex of the file key encrypted under the master key
    pub file_key: String,
    /// Hex IV used to wrap the file key
    pub file_key_iv: String,
    pub key_encryption_algorithm: String,
    pub data_encryption_algorithm: String,
}

impl KeyMaterial {
    pub fn new(master_key_id: &str, file_key: String, file_key_iv: String) -> Self {
        KeyMaterial {
            master_key_id: master_key_id.to_string(),
            file_key,
            file_key_iv,
            key_encryption_algorithm: AES_256_CBC.to_string(),
            data_encryption_algorithm: AES_256_CBC.to_string(),
        }
    }

    fn check_algorithms(&self) -> Result<(), CryptoError> {
        for algorithm in [&self.key_encryption_algorithm, &self.data_encryption_algorithm] {
            if algorithm != AES_256_CBC {
                return Err(CryptoError::UnsupportedAlgorithm(algorithm.clone()));
            }
        }
        Ok(())
    }
}

/// Hex ciphertext and IV of the sealed sensitive sections.
///
/// Produced for one flush or consumed by one load. Kept in the store only
/// when a load could not open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub ciphertext: String,
    pub iv: String,
}

/// Key wrapping and sealing on top of an external keyring
pub struct SensitiveVault<'a> {
    keyring: &'a dyn Keyring,
    master_key_id: &'a str,
}

impl<'a> SensitiveVault<'a> {
    pub fn new(keyring: &'a dyn Keyring, master_key_id: &'a str) -> Self {
        SensitiveVault {
            keyring,
            master_key_id,
        }
    }

    pub fn is_available(&self) -> bool {
        self.keyring.available()
    }

    fn master_key(&self, id: &str, generate: bool) -> Result<AesKey, CryptoError> {
        if !self.keyring.available() {
            return Err(CryptoError::KeyringUnavailable);
        }
        let secret = match self.keyring.read_secret(id)? {
            Some(secret) => secret,
            None if generate => {
                info!(master_key_id = %id, "Generating master key for persisted sensitive variables");
                self.keyring.generate(id)?;
                self.keyring
                    .read_secret(id)?
                    .ok_or_else(|| CryptoError::MasterKeyMissing { id: id.to_string() })?
            }
            None => return Err(CryptoError::MasterKeyMissing { id: id.to_string() }),
        };
        AesKey::from_slice(&secret)
    }

    /// Return the plaintext file key, creating and wrapping one if needed.
    ///
    /// Existing key material is unwrapped with the master key it names.
    /// Without key material a random file key is generated, wrapped with the
    /// configured master key and stored into `material`.
    pub fn ensure_file_key(
        &self,
        material: &mut Option<KeyMaterial>,
        generate: bool,
    ) -> Result<AesKey, CryptoError> {
        if let Some(existing) = material.as_ref() {
            existing.check_algorithms()?;
            if existing.file_key.is_empty() || existing.file_key_iv.is_empty() {
                return Err(CryptoError::NoFileKey);
            }
            let master = self.master_key(&existing.master_key_id, generate)?;
            return cipher::unwrap_key(&master, &existing.file_key, &existing.file_key_iv);
        }

        let master = self.master_key(self.master_key_id, generate)?;
        let file_key = AesKey::generate();
        let (wrapped, iv) = cipher::wrap_key(&master, &file_key)?;
        debug!(master_key_id = %self.master_key_id, "Generated new file key");
        *material = Some(KeyMaterial::new(self.master_key_id, wrapped, iv));
        Ok(file_key)
    }

    /// Serialize and seal the sensitive sections, generating keys if absent
    pub fn seal_sections(
        &self,
        material: &mut Option<KeyMaterial>,
        sections: &SensitiveSections,
    ) -> Result<SealedBlob, CryptoError> {
        let file_key = self.ensure_file_key(material, true)?;
        let plaintext = codec::encode_sensitive_fragment(sections);
        cipher::seal(&file_key, &plaintext)
    }

    /// Open and parse sealed sections. Any failure rejects the whole blob.
    pub fn open_sections(
        &self,
        material: &KeyMaterial,
        blob: &SealedBlob,
    ) -> Result<SensitiveSections, CryptoError> {
        let mut material = Some(material.clone());
        let file_key = self.ensure_file_key(&mut material, false)?;
        let plaintext = cipher::open(&file_key, blob)?;
        Ok(codec::parse_sensitive_fragment(&plaintext)?)
    }
}
