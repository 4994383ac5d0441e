//! Persisted Variable Records
//!
//! The unit of persisted state and the tags that place it in a partition.
//!
//! ## Partitions
//!
//! ```text
//!                 plain                sensitive
//!  static    StaticParseEarly     SensitiveStatic
//!            Static
//!  dynamic   DynamicParseEarly    SensitiveDynamic
//!            Dynamic
//! ```
//!
//! A name lives in exactly one partition. The store keeps a single table
//! keyed by lower-cased name; partitions are filtered views over it.

mod store;

pub use store::{RecordStore, StoredRecord};

use serde::{Deserialize, Serialize};

/// Timestamp in microseconds since the Unix epoch
pub type Micros = u64;

/// Who issued the persisting statement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub user: String,
    pub host: String,
}

impl Provenance {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Provenance {
            user: user.into(),
            host: host.into(),
        }
    }
}

/// A persisted variable override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Lower-cased variable name
    pub name: String,
    /// Canonical string form of the value (empty when `is_null`)
    pub value: String,
    /// When the value was persisted (micros)
    pub timestamp: Micros,
    pub user: String,
    pub host: String,
    /// Explicit NULL override
    pub is_null: bool,
}

impl Record {
    /// Create a record. Names are lower-cased and NULL records carry an empty value.
    pub fn new(
        name: &str,
        value: &str,
        is_null: bool,
        who: &Provenance,
        timestamp: Micros,
    ) -> Self {
        Record {
            name: normalize_name(name),
            value: if is_null { String::new() } else { value.to_string() },
            timestamp,
            user: who.user.clone(),
            host: who.host.clone(),
            is_null,
        }
    }

    /// Same value and metadata under another name (alias mirroring)
    pub fn renamed(&self, name: &str) -> Self {
        Record {
            name: normalize_name(name),
            ..self.clone()
        }
    }

    /// `Some(value)` unless this is a NULL override
    pub fn value_opt(&self) -> Option<&str> {
        if self.is_null {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// Lower-case a variable name for storage and lookup
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Normalize a boolean spelling to `ON`/`OFF`; other strings pass through unchanged
pub fn normalize_bool(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => "ON".to_string(),
        "0" | "off" | "false" | "no" => "OFF".to_string(),
        _ => value.to_string(),
    }
}

/// Restart-required vs live-applicable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableClass {
    Static,
    Dynamic,
}

/// Where a record is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionTag {
    pub class: VariableClass,
    pub sensitive: bool,
    pub parse_early: bool,
}

impl PartitionTag {
    /// Build a tag. Sensitive variables never land in a parse-early partition.
    pub fn new(class: VariableClass, sensitive: bool, parse_early: bool) -> Self {
        PartitionTag {
            class,
            sensitive,
            parse_early: parse_early && !sensitive,
        }
    }

    pub fn partition(&self) -> Partition {
        match (self.class, self.sensitive, self.parse_early) {
            (VariableClass::Static, true, _) => Partition::SensitiveStatic,
            (VariableClass::Dynamic, true, _) => Partition::SensitiveDynamic,
            (VariableClass::Static, false, true) => Partition::StaticParseEarly,
            (VariableClass::Dynamic, false, true) => Partition::DynamicParseEarly,
            (VariableClass::Static, false, false) => Partition::Static,
            (VariableClass::Dynamic, false, false) => Partition::Dynamic,
        }
    }
}

/// The six logical partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Partition {
    StaticParseEarly,
    DynamicParseEarly,
    Static,
    Dynamic,
    SensitiveStatic,
    SensitiveDynamic,
}

impl Partition {
    pub const ALL: [Partition; 6] = [
        Partition::StaticParseEarly,
        Partition::DynamicParseEarly,
        Partition::Static,
        Partition::Dynamic,
        Partition::SensitiveStatic,
        Partition::SensitiveDynamic,
    ];

    pub fn tag(&self) -> PartitionTag {
        match self {
            Partition::StaticParseEarly => PartitionTag::new(VariableClass::Static, false, true),
            Partition::DynamicParseEarly => PartitionTag::new(VariableClass::Dynamic, false, true),
            Partition::Static => PartitionTag::new(VariableClass::Static, false, false),
            Partition::Dynamic => PartitionTag::new(VariableClass::Dynamic, false, false),
            Partition::SensitiveStatic => PartitionTag::new(VariableClass::Static, true, false),
            Partition::SensitiveDynamic => PartitionTag::new(VariableClass::Dynamic, true, false),
        }
    }

    pub fn class(&self) -> VariableClass {
        self.tag().class
    }

    pub fn is_sensitive(&self) -> bool {
        self.tag().sensitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lowercases_name() {
        let r = Record::new("Max_Connections", "500", false, &Provenance::new("root", "localhost"), 1);
        assert_eq!(r.name, "max_connections");
        assert_eq!(r.value_opt(), Some("500"));
    }

    #[test]
    fn test_null_record_has_empty_value() {
        let r = Record::new("init_connect", "ignored", true, &Provenance::default(), 1);
        assert!(r.is_null);
        assert_eq!(r.value, "");
        assert_eq!(r.value_opt(), None);
    }

    #[test]
    fn test_normalize_bool() {
        assert_eq!(normalize_bool("1"), "ON");
        assert_eq!(normalize_bool("True"), "ON");
        assert_eq!(normalize_bool("off"), "OFF");
        assert_eq!(normalize_bool("0"), "OFF");
        assert_eq!(normalize_bool("maybe"), "maybe");
    }

    #[test]
    fn test_sensitive_tag_drops_parse_early() {
        let tag = PartitionTag::new(VariableClass::Static, true, true);
        assert!(!tag.parse_early);
        assert_eq!(tag.partition(), Partition::SensitiveStatic);
    }

    #[test]
    fn test_partition_tag_round_trip() {
        for p in Partition::ALL {
            assert_eq!(p.tag().partition(), p);
        }
    }
}
