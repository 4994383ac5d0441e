//! Top-level error type for persisted-variables operations

use crate::codec::ParseError;
use crate::persist::ConfigError;
use crate::storage::StorageError;
use crate::vault::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to parse persisted variables: {0}")]
    Parse(#[from] ParseError),
    #[error("sensitive variables: {0}")]
    Crypto(#[from] CryptoError),
    #[error("persisted variables file: {0}")]
    Storage(#[from] StorageError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    /// Reset of a name that has no persisted record
    #[error("variable '{0}' does not exist in persisted config file")]
    NotFound(String),
    #[error("unknown system variable '{0}'")]
    UnknownVariable(String),
    #[error("variable '{0}' is a non persistent variable")]
    NotPersistable(String),
    #[error("access denied: {user}@{host} lacks {action} for '{scope}'")]
    PermissionDenied {
        user: String,
        host: String,
        action: String,
        scope: String,
    },
}

pub type Result<T> = std::result::Result<T, PersistError>;
