//! Configuration for Persisted Variables
//!
//! Resolved once at startup from the environment or a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default primary file name
pub const DEFAULT_FILE_NAME: &str = "mysqld-auto.cnf";

/// Default keyring id of the master wrapping key
pub const DEFAULT_MASTER_KEY_ID: &str = "persisted_variables_key";

/// Errors while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Persisted-variables configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Directory holding the primary file and its shadow
    pub data_dir: PathBuf,
    /// Primary file name; the shadow is `<file_name>.backup`
    pub file_name: String,
    /// Read the file during `init`. Flushes write it either way.
    pub load_on_startup: bool,
    /// Keep sensitive values in plaintext when no keyring is available
    pub persist_sensitive_variables_in_plaintext: bool,
    /// Keyring id of the master key that wraps the file key
    pub master_key_id: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            data_dir: PathBuf::from("."),
            file_name: DEFAULT_FILE_NAME.to_string(),
            load_on_startup: true,
            persist_sensitive_variables_in_plaintext: false,
            master_key_id: DEFAULT_MASTER_KEY_ID.to_string(),
        }
    }
}

impl PersistConfig {
    /// Load configuration from environment variables
    ///
    /// - `PERSIST_DATA_DIR` (default `.`)
    /// - `PERSIST_FILE_NAME` (default `mysqld-auto.cnf`)
    /// - `PERSIST_LOAD_ON_STARTUP` (default `true`)
    /// - `PERSIST_SENSITIVE_PLAINTEXT` (default `false`)
    /// - `PERSIST_MASTER_KEY_ID` (default `persisted_variables_key`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        PersistConfig {
            data_dir: std::env::var("PERSIST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            file_name: std::env::var("PERSIST_FILE_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.file_name),
            load_on_startup: std::env::var("PERSIST_LOAD_ON_STARTUP")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.load_on_startup),
            persist_sensitive_variables_in_plaintext: std::env::var("PERSIST_SENSITIVE_PLAINTEXT")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.persist_sensitive_variables_in_plaintext),
            master_key_id: std::env::var("PERSIST_MASTER_KEY_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.master_key_id),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PersistConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Config for a local data directory
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        PersistConfig {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Config for tests: plaintext fallback allowed so sensitive variables
    /// work without a keyring
    pub fn test(data_dir: impl Into<PathBuf>) -> Self {
        PersistConfig {
            data_dir: data_dir.into(),
            persist_sensitive_variables_in_plaintext: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_name.is_empty() {
            return Err(ConfigError::Invalid("file_name must not be empty".to_string()));
        }
        if self.file_name.contains('/') || self.file_name.contains('\\') {
            return Err(ConfigError::Invalid(format!(
                "file_name '{}' must not contain a path separator",
                self.file_name
            )));
        }
        if self.master_key_id.is_empty() {
            return Err(ConfigError::Invalid("master_key_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn primary_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistConfig::default();
        assert_eq!(config.file_name, "mysqld-auto.cnf");
        assert!(config.load_on_startup);
        assert!(!config.persist_sensitive_variables_in_plaintext);
        assert_eq!(config.master_key_id, "persisted_variables_key");
    }

    #[test]
    fn test_from_toml_partial() {
        let config = PersistConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/mysql"
            persist_sensitive_variables_in_plaintext = true
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/mysql"));
        assert!(config.persist_sensitive_variables_in_plaintext);
        assert_eq!(config.file_name, DEFAULT_FILE_NAME);
        assert_eq!(config.primary_path(), PathBuf::from("/var/lib/mysql/mysqld-auto.cnf"));
    }

    #[test]
    fn test_from_toml_rejects_path_in_file_name() {
        let err = PersistConfig::from_toml_str(r#"file_name = "../etc/x.cnf""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.toml");
        std::fs::write(&path, "load_on_startup = false\n").unwrap();
        let config = PersistConfig::from_toml_file(&path).unwrap();
        assert!(!config.load_on_startup);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
