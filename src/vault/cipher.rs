//! AES-256-CBC primitives for the sensitive envelope
//!
//! Stateless: every call takes explicit key material and returns owned
//! output. Plaintext and raw keys live in `Zeroizing` buffers so they are
//! wiped on every exit path. Ciphertext and IVs are hex-encoded on disk.

use super::{CryptoError, SealedBlob};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;
/// CBC IV length in bytes
pub const IV_LEN: usize = 16;

/// Algorithm tag written for both the key and the data envelope
pub const AES_256_CBC: &str = "AES_256_CBC";

/// A 256-bit AES key, wiped on drop
#[derive(Clone)]
pub struct AesKey(Zeroizing<[u8; KEY_LEN]>);

impl AesKey {
    /// Fresh random key from the OS RNG
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        AesKey(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(AesKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn encrypt(key: &AesKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| CryptoError::Encrypt("invalid key or IV length".to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt(
    key: &AesKey,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::Decrypt(format!(
            "IV must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| CryptoError::Decrypt("invalid key or IV length".to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt("bad padding (wrong key or corrupt data)".to_string()))
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|source| CryptoError::InvalidHex { field, source })
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Output differs on every call even for identical plaintext.
pub fn seal(key: &AesKey, plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
    let iv = random_iv();
    let ciphertext = encrypt(key, &iv, plaintext)?;
    Ok(SealedBlob {
        ciphertext: hex::encode(ciphertext),
        iv: hex::encode(iv),
    })
}

/// Decrypt a sealed blob
pub fn open(key: &AesKey, blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let ciphertext = decode_hex("mysql_sensitive_variables_blob", &blob.ciphertext)?;
    let iv = decode_hex("mysql_sensitive_variables_iv", &blob.iv)?;
    decrypt(key, &iv, &ciphertext)
}

/// Wrap a file key with the master key. Returns `(wrapped_hex, iv_hex)`.
pub fn wrap_key(master: &AesKey, file_key: &AesKey) -> Result<(String, String), CryptoError> {
    let iv = random_iv();
    let wrapped = encrypt(master, &iv, file_key.as_bytes())?;
    Ok((hex::encode(wrapped), hex::encode(iv)))
}

/// Unwrap a file key previously produced by [`wrap_key`]
pub fn unwrap_key(master: &AesKey, wrapped_hex: &str, iv_hex: &str) -> Result<AesKey, CryptoError> {
    let wrapped = decode_hex("file_key", wrapped_hex)?;
    let iv = decode_hex("file_key_iv", iv_hex)?;
    let raw = decrypt(master, &iv, &wrapped)?;
    AesKey::from_slice(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let key = AesKey::generate();
        let blob = seal(&key, b"{\"secret\":\"value\"}").unwrap();
        let opened = open(&key, &blob).unwrap();
        assert_eq!(opened.as_slice(), b"{\"secret\":\"value\"}");
    }

    #[test]
    fn test_seal_is_not_byte_idempotent() {
        let key = AesKey::generate();
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(open(&key, &a).unwrap().as_slice(), b"same plaintext");
        assert_eq!(open(&key, &b).unwrap().as_slice(), b"same plaintext");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let key = AesKey::generate();
        let other = AesKey::generate();
        let blob = seal(&key, b"0123456789abcdef0123456789abcdef").unwrap();
        // A wrong key almost always yields bad padding; if the padding happens
        // to be valid the plaintext still differs.
        match open(&other, &blob) {
            Err(CryptoError::Decrypt(_)) => {}
            Ok(p) => assert_ne!(p.as_slice(), b"0123456789abcdef0123456789abcdef"),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_open_rejects_bad_hex() {
        let key = AesKey::generate();
        let blob = SealedBlob {
            ciphertext: "not-hex".to_string(),
            iv: "00".repeat(IV_LEN),
        };
        assert!(matches!(open(&key, &blob), Err(CryptoError::InvalidHex { .. })));
    }

    #[test]
    fn test_wrap_unwrap_key() {
        let master = AesKey::generate();
        let file_key = AesKey::generate();
        let (wrapped, iv) = wrap_key(&master, &file_key).unwrap();

        assert_ne!(wrapped, hex::encode(file_key.as_bytes()));
        let unwrapped = unwrap_key(&master, &wrapped, &iv).unwrap();
        assert_eq!(unwrapped.as_bytes(), file_key.as_bytes());
    }

    #[test]
    fn test_key_length_checked() {
        assert!(matches!(
            AesKey::from_slice(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }
}
