//! Document parser
//!
//! Strict at the document level, lenient per record:
//! - malformed JSON, `Version`, section type or sensitive object: hard error
//! - a malformed record inside a section: logged and skipped
//!
//! Sections decrypted from the sealed blob are parsed strictly; a corrupt
//! blob cannot be partially trusted.

use super::document::*;
use super::ParseError;
use crate::record::Record;
use crate::vault::{KeyMaterial, SealedBlob};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

/// How to treat a malformed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordPolicy {
    SkipMalformed,
    Strict,
}

#[derive(Deserialize)]
struct MetadataRepr {
    #[serde(rename = "Timestamp")]
    timestamp: u64,
    #[serde(rename = "User")]
    user: String,
    #[serde(rename = "Host")]
    host: String,
}

#[derive(Deserialize)]
struct RecordRepr {
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "Metadata")]
    metadata: MetadataRepr,
}

/// Parse any supported document version
pub fn parse(bytes: &[u8]) -> Result<Document, ParseError> {
    let root: Value = serde_json::from_slice(bytes)?;
    let root = root.as_object().ok_or(ParseError::NotAnObject)?;

    match read_version(root)? {
        1 => parse_v1(root).map(Document::V1),
        2 => parse_v2(root).map(Document::V2),
        other => Err(ParseError::UnsupportedVersion(other)),
    }
}

/// Missing `Version` means V1
fn read_version(root: &Map<String, Value>) -> Result<u64, ParseError> {
    match root.get(KEY_VERSION) {
        None => Ok(1),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| ParseError::MalformedVersion(v.to_string())),
    }
}

fn parse_v1(root: &Map<String, Value>) -> Result<DocumentV1, ParseError> {
    let server = root
        .get(V1_SERVER)
        .ok_or(ParseError::MissingSection(V1_SERVER))?;
    let server = expect_object(V1_SERVER, server)?;

    let mut records = Section::new();
    for (name, value) in server {
        if name == V1_STATIC_OPTIONS {
            let nested = expect_object(V1_STATIC_OPTIONS, value)?;
            parse_entries(V1_STATIC_OPTIONS, nested, RecordPolicy::SkipMalformed, &mut records)?;
            continue;
        }
        parse_entry(V1_SERVER, name, value, RecordPolicy::SkipMalformed, &mut records)?;
    }
    Ok(DocumentV1 { records })
}

fn parse_v2(root: &Map<String, Value>) -> Result<DocumentV2, ParseError> {
    let mut doc = DocumentV2 {
        static_parse_early: optional_section(root, STATIC_PARSE_EARLY, RecordPolicy::SkipMalformed)?,
        dynamic_parse_early: optional_section(root, DYNAMIC_PARSE_EARLY, RecordPolicy::SkipMalformed)?,
        static_vars: optional_section(root, STATIC_VARIABLES, RecordPolicy::SkipMalformed)?,
        dynamic_vars: optional_section(root, DYNAMIC_VARIABLES, RecordPolicy::SkipMalformed)?,
        sensitive: None,
    };

    if let Some(value) = root.get(SENSITIVE) {
        let object = expect_object(SENSITIVE, value)?;
        doc.sensitive = Some(parse_sensitive(object)?);
    }
    Ok(doc)
}

fn parse_sensitive(object: &Map<String, Value>) -> Result<SensitiveEnvelope, ParseError> {
    let key_material = if object.contains_key(FILE_KEY) || object.contains_key(MASTER_KEY_ID) {
        Some(KeyMaterial {
            master_key_id: required_str(object, MASTER_KEY_ID)?,
            file_key: required_str(object, FILE_KEY)?,
            file_key_iv: required_str(object, FILE_KEY_IV)?,
            key_encryption_algorithm: required_str(object, KEY_ENCRYPTION_ALGORITHM)?,
            data_encryption_algorithm: required_str(object, DATA_ENCRYPTION_ALGORITHM)?,
        })
    } else {
        None
    };

    let sealed = match (object.contains_key(SENSITIVE_BLOB), object.contains_key(SENSITIVE_IV)) {
        (false, false) => None,
        (true, true) => Some(SealedBlob {
            ciphertext: required_str(object, SENSITIVE_BLOB)?,
            iv: required_str(object, SENSITIVE_IV)?,
        }),
        (true, false) => return Err(malformed_sensitive(SENSITIVE_IV)),
        (false, true) => return Err(malformed_sensitive(SENSITIVE_BLOB)),
    };
    if sealed.is_some() && key_material.is_none() {
        return Err(malformed_sensitive(FILE_KEY));
    }

    let plaintext = if object.contains_key(SENSITIVE_STATIC) || object.contains_key(SENSITIVE_DYNAMIC) {
        Some(SensitiveSections {
            static_vars: optional_section(object, SENSITIVE_STATIC, RecordPolicy::SkipMalformed)?,
            dynamic_vars: optional_section(object, SENSITIVE_DYNAMIC, RecordPolicy::SkipMalformed)?,
        })
    } else {
        None
    };

    Ok(SensitiveEnvelope {
        key_material,
        sealed,
        plaintext,
    })
}

/// Parse the decrypted content of the sealed blob. Every record must be valid.
pub fn parse_sensitive_fragment(bytes: &[u8]) -> Result<SensitiveSections, ParseError> {
    let root: Value = serde_json::from_slice(bytes)?;
    let root = root.as_object().ok_or(ParseError::NotAnObject)?;
    Ok(SensitiveSections {
        static_vars: optional_section(root, SENSITIVE_STATIC, RecordPolicy::Strict)?,
        dynamic_vars: optional_section(root, SENSITIVE_DYNAMIC, RecordPolicy::Strict)?,
    })
}

fn malformed_sensitive(field: &str) -> ParseError {
    ParseError::MalformedSensitive {
        field: field.to_string(),
    }
}

fn required_str(object: &Map<String, Value>, field: &str) -> Result<String, ParseError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed_sensitive(field))
}

fn expect_object<'a>(section: &str, value: &'a Value) -> Result<&'a Map<String, Value>, ParseError> {
    value.as_object().ok_or_else(|| ParseError::WrongSectionType {
        section: section.to_string(),
    })
}

/// Absent section is empty; present but not an object is an error
fn optional_section(
    root: &Map<String, Value>,
    section: &str,
    policy: RecordPolicy,
) -> Result<Section, ParseError> {
    let mut out = Section::new();
    if let Some(value) = root.get(section) {
        let entries = expect_object(section, value)?;
        parse_entries(section, entries, policy, &mut out)?;
    }
    Ok(out)
}

fn parse_entries(
    section: &str,
    entries: &Map<String, Value>,
    policy: RecordPolicy,
    out: &mut Section,
) -> Result<(), ParseError> {
    for (name, value) in entries {
        parse_entry(section, name, value, policy, out)?;
    }
    Ok(())
}

fn parse_entry(
    section: &str,
    name: &str,
    value: &Value,
    policy: RecordPolicy,
    out: &mut Section,
) -> Result<(), ParseError> {
    match parse_record(name, value) {
        Ok(record) => {
            out.insert(record.name.clone(), record);
            Ok(())
        }
        Err(reason) => match policy {
            RecordPolicy::SkipMalformed => {
                warn!(section, name, reason = %reason, "Skipping malformed persisted variable");
                Ok(())
            }
            RecordPolicy::Strict => Err(ParseError::MalformedRecord {
                section: section.to_string(),
                name: name.to_string(),
                reason,
            }),
        },
    }
}

fn parse_record(name: &str, value: &Value) -> Result<Record, String> {
    if name.trim().is_empty() {
        return Err("empty variable name".to_string());
    }
    let object = value.as_object().ok_or("record is not an object")?;
    // `Value: null` is a NULL override; a missing `Value` is malformed
    if !object.contains_key(KEY_VALUE) {
        return Err(format!("missing '{}'", KEY_VALUE));
    }
    let repr: RecordRepr = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    let who = crate::record::Provenance {
        user: repr.metadata.user,
        host: repr.metadata.host,
    };
    let is_null = repr.value.is_none();
    Ok(Record::new(
        name,
        repr.value.as_deref().unwrap_or(""),
        is_null,
        &who,
        repr.metadata.timestamp,
    ))
}
