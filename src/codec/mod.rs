//! Document Codec
//!
//! Converts the record store to and from the versioned JSON document.
//!
//! ## Formats
//!
//! ```text
//! V1  { "Version": 1?, "mysql_server": { name: Record, ... } }
//! V2  { "Version": 2,
//!       "mysql_static_parse_early_variables":  { name: Record },
//!       "mysql_dynamic_parse_early_variables": { name: Record },
//!       "mysql_static_variables":              { name: Record },
//!       "mysql_dynamic_variables":             { name: Record },
//!       "mysql_sensitive_variables": { key material, sealed blob | plaintext } }
//!
//! Record = { "Value": string|null, "Metadata": { "Timestamp", "User", "Host" } }
//! ```

pub mod document;
mod encode;
pub mod migrate;
mod parse;

pub use document::{
    Document, DocumentV1, DocumentV2, Section, SensitiveEnvelope, SensitiveSections,
    CURRENT_VERSION,
};
pub use encode::{encode_sensitive_fragment, serialize};
pub use migrate::{migrate_v1_to_v2, to_current};
pub use parse::{parse, parse_sensitive_fragment};

/// Whole-document parse failures. Always fatal for the load.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document root is not an object")]
    NotAnObject,
    #[error("malformed Version: {0}")]
    MalformedVersion(String),
    #[error("unsupported document version {0}")]
    UnsupportedVersion(u64),
    #[error("missing required section '{0}'")]
    MissingSection(&'static str),
    #[error("section '{section}' is not an object")]
    WrongSectionType { section: String },
    #[error("sensitive section field '{field}' is missing or malformed")]
    MalformedSensitive { field: String },
    #[error("malformed record '{name}' in '{section}': {reason}")]
    MalformedRecord {
        section: String,
        name: String,
        reason: String,
    },
}
