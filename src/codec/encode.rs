//! Document serializer
//!
//! Output is pretty-printed JSON with sorted keys, so a store without
//! sensitive records serializes to identical bytes every time.

use super::document::*;
use crate::record::Record;
use crate::vault::KeyMaterial;
use serde_json::{json, Map, Value};
use zeroize::Zeroizing;

/// Serialize a document of any version
pub fn serialize(doc: &Document) -> Vec<u8> {
    let root = match doc {
        Document::V1(v1) => encode_v1(v1),
        Document::V2(v2) => encode_v2(v2),
    };
    format!("{:#}", root).into_bytes()
}

/// Serialize the plaintext that goes into the sealed blob
pub fn encode_sensitive_fragment(sections: &SensitiveSections) -> Zeroizing<Vec<u8>> {
    let mut root = Map::new();
    root.insert(SENSITIVE_STATIC.to_string(), encode_section(&sections.static_vars));
    root.insert(SENSITIVE_DYNAMIC.to_string(), encode_section(&sections.dynamic_vars));
    Zeroizing::new(Value::Object(root).to_string().into_bytes())
}

pub(crate) fn encode_record(record: &Record) -> Value {
    let value = match record.value_opt() {
        Some(v) => Value::String(v.to_string()),
        None => Value::Null,
    };
    json!({
        KEY_VALUE: value,
        KEY_METADATA: {
            KEY_TIMESTAMP: record.timestamp,
            KEY_USER: record.user,
            KEY_HOST: record.host,
        }
    })
}

fn encode_section(section: &Section) -> Value {
    let map: Map<String, Value> = section
        .iter()
        .map(|(name, record)| (name.clone(), encode_record(record)))
        .collect();
    Value::Object(map)
}

fn encode_v1(doc: &DocumentV1) -> Value {
    json!({
        KEY_VERSION: 1,
        V1_SERVER: encode_section(&doc.records),
    })
}

fn encode_v2(doc: &DocumentV2) -> Value {
    let mut root = Map::new();
    root.insert(KEY_VERSION.to_string(), json!(CURRENT_VERSION));
    root.insert(STATIC_PARSE_EARLY.to_string(), encode_section(&doc.static_parse_early));
    root.insert(DYNAMIC_PARSE_EARLY.to_string(), encode_section(&doc.dynamic_parse_early));
    root.insert(STATIC_VARIABLES.to_string(), encode_section(&doc.static_vars));
    root.insert(DYNAMIC_VARIABLES.to_string(), encode_section(&doc.dynamic_vars));
    if let Some(sensitive) = &doc.sensitive {
        root.insert(SENSITIVE.to_string(), encode_sensitive(sensitive));
    }
    Value::Object(root)
}

fn encode_key_material(material: &KeyMaterial, out: &mut Map<String, Value>) {
    out.insert(MASTER_KEY_ID.to_string(), json!(material.master_key_id));
    out.insert(FILE_KEY.to_string(), json!(material.file_key));
    out.insert(FILE_KEY_IV.to_string(), json!(material.file_key_iv));
    out.insert(
        KEY_ENCRYPTION_ALGORITHM.to_string(),
        json!(material.key_encryption_algorithm),
    );
    out.insert(
        DATA_ENCRYPTION_ALGORITHM.to_string(),
        json!(material.data_encryption_algorithm),
    );
}

fn encode_sensitive(envelope: &SensitiveEnvelope) -> Value {
    let mut out = Map::new();
    if let Some(material) = &envelope.key_material {
        encode_key_material(material, &mut out);
    }
    if let Some(sealed) = &envelope.sealed {
        out.insert(SENSITIVE_BLOB.to_string(), json!(sealed.ciphertext));
        out.insert(SENSITIVE_IV.to_string(), json!(sealed.iv));
    }
    if let Some(plaintext) = &envelope.plaintext {
        out.insert(SENSITIVE_STATIC.to_string(), encode_section(&plaintext.static_vars));
        out.insert(SENSITIVE_DYNAMIC.to_string(), encode_section(&plaintext.dynamic_vars));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse;
    use crate::record::Provenance;

    fn rec(name: &str, value: &str, ts: u64) -> Record {
        Record::new(name, value, false, &Provenance::new("root", "localhost"), ts)
    }

    #[test]
    fn test_record_shape() {
        let value = encode_record(&rec("max_connections", "500", 1000));
        assert_eq!(
            value,
            json!({"Value": "500", "Metadata": {"Timestamp": 1000, "User": "root", "Host": "localhost"}})
        );
    }

    #[test]
    fn test_null_record_shape() {
        let r = Record::new("init_connect", "", true, &Provenance::default(), 3);
        assert_eq!(encode_record(&r)["Value"], Value::Null);
    }

    #[test]
    fn test_v2_round_trip() {
        let mut doc = DocumentV2::default();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let r = rec(name, &format!("v{}", i), i as u64 * 10);
            doc.dynamic_vars.insert(r.name.clone(), r);
        }
        let s = rec("innodb_buffer_pool_size", "134217728", 99);
        doc.static_parse_early.insert(s.name.clone(), s);
        let n = Record::new("init_connect", "", true, &Provenance::new("u", "h"), 5);
        doc.static_vars.insert(n.name.clone(), n);

        let parsed = parse(&serialize(&Document::V2(doc.clone()))).unwrap();
        assert_eq!(parsed, Document::V2(doc));
    }

    #[test]
    fn test_serialize_is_stable_without_sensitive() {
        let mut doc = DocumentV2::default();
        let r = rec("x", "1", 1);
        doc.dynamic_vars.insert(r.name.clone(), r);
        let doc = Document::V2(doc);
        assert_eq!(serialize(&doc), serialize(&doc));
    }

    #[test]
    fn test_empty_v2_writes_all_sections() {
        let bytes = serialize(&Document::V2(DocumentV2::default()));
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["Version"], json!(2));
        for key in [STATIC_PARSE_EARLY, DYNAMIC_PARSE_EARLY, STATIC_VARIABLES, DYNAMIC_VARIABLES] {
            assert!(value[key].is_object(), "missing section {}", key);
        }
        assert!(value.get(SENSITIVE).is_none());
    }
}
