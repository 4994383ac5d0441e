//! Schema types for each on-disk format version

use crate::record::{Partition, Record};
use crate::vault::{KeyMaterial, SealedBlob};
use std::collections::BTreeMap;

/// Current on-disk format version
pub const CURRENT_VERSION: u64 = 2;

pub const KEY_VERSION: &str = "Version";
pub const KEY_VALUE: &str = "Value";
pub const KEY_METADATA: &str = "Metadata";
pub const KEY_TIMESTAMP: &str = "Timestamp";
pub const KEY_USER: &str = "User";
pub const KEY_HOST: &str = "Host";

/// V1 top-level object
pub const V1_SERVER: &str = "mysql_server";
/// V1 nested object of read-only options
pub const V1_STATIC_OPTIONS: &str = "mysql_server_static_options";

pub const STATIC_PARSE_EARLY: &str = "mysql_static_parse_early_variables";
pub const DYNAMIC_PARSE_EARLY: &str = "mysql_dynamic_parse_early_variables";
pub const STATIC_VARIABLES: &str = "mysql_static_variables";
pub const DYNAMIC_VARIABLES: &str = "mysql_dynamic_variables";

pub const SENSITIVE: &str = "mysql_sensitive_variables";
pub const SENSITIVE_STATIC: &str = "mysql_sensitive_static_variables";
pub const SENSITIVE_DYNAMIC: &str = "mysql_sensitive_dynamic_variables";
pub const MASTER_KEY_ID: &str = "master_key_id";
pub const FILE_KEY: &str = "file_key";
pub const FILE_KEY_IV: &str = "file_key_iv";
pub const KEY_ENCRYPTION_ALGORITHM: &str = "key_encryption_algorithm";
pub const DATA_ENCRYPTION_ALGORITHM: &str = "data_encryption_algorithm";
pub const SENSITIVE_BLOB: &str = "mysql_sensitive_variables_blob";
pub const SENSITIVE_IV: &str = "mysql_sensitive_variables_iv";

/// Records of one section keyed by name
pub type Section = BTreeMap<String, Record>;

/// Legacy flat format: every record is static, parse-early status unknown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentV1 {
    pub records: Section,
}

/// Plaintext content of the sensitive envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveSections {
    pub static_vars: Section,
    pub dynamic_vars: Section,
}

impl SensitiveSections {
    pub fn is_empty(&self) -> bool {
        self.static_vars.is_empty() && self.dynamic_vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.static_vars.len() + self.dynamic_vars.len()
    }
}

/// The `mysql_sensitive_variables` object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveEnvelope {
    pub key_material: Option<KeyMaterial>,
    pub sealed: Option<SealedBlob>,
    /// Fallback copies written when no keyring is available
    pub plaintext: Option<SensitiveSections>,
}

/// Current sectioned format
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentV2 {
    pub static_parse_early: Section,
    pub dynamic_parse_early: Section,
    pub static_vars: Section,
    pub dynamic_vars: Section,
    pub sensitive: Option<SensitiveEnvelope>,
}

impl DocumentV2 {
    /// Non-sensitive section backing a partition
    pub fn section(&self, partition: Partition) -> Option<&Section> {
        match partition {
            Partition::StaticParseEarly => Some(&self.static_parse_early),
            Partition::DynamicParseEarly => Some(&self.dynamic_parse_early),
            Partition::Static => Some(&self.static_vars),
            Partition::Dynamic => Some(&self.dynamic_vars),
            Partition::SensitiveStatic | Partition::SensitiveDynamic => None,
        }
    }

    pub fn section_mut(&mut self, partition: Partition) -> Option<&mut Section> {
        match partition {
            Partition::StaticParseEarly => Some(&mut self.static_parse_early),
            Partition::DynamicParseEarly => Some(&mut self.dynamic_parse_early),
            Partition::Static => Some(&mut self.static_vars),
            Partition::Dynamic => Some(&mut self.dynamic_vars),
            Partition::SensitiveStatic | Partition::SensitiveDynamic => None,
        }
    }

    /// Number of plaintext records (sealed content not counted)
    pub fn plain_record_count(&self) -> usize {
        let sensitive = self
            .sensitive
            .as_ref()
            .and_then(|s| s.plaintext.as_ref())
            .map(SensitiveSections::len)
            .unwrap_or(0);
        self.static_parse_early.len()
            + self.dynamic_parse_early.len()
            + self.static_vars.len()
            + self.dynamic_vars.len()
            + sensitive
    }
}

/// A parsed document of any supported version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    V1(DocumentV1),
    V2(DocumentV2),
}

impl Document {
    pub fn version(&self) -> u64 {
        match self {
            Document::V1(_) => 1,
            Document::V2(_) => 2,
        }
    }
}
