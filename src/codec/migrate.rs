//! Format migrations
//!
//! Each step lifts a document by one version. Migrations are pure: loading
//! never rewrites the file, the next flush simply writes the current version.

use super::document::{Document, DocumentV1, DocumentV2, CURRENT_VERSION};
use super::ParseError;

type Step = fn(Document) -> Document;

/// `(from_version, step)`; a V3 adds one row here
const MIGRATIONS: &[(u64, Step)] = &[(1, step_v1_to_v2)];

/// V1 records have unknown parse-early status, so they all become
/// static parse-early records.
pub fn migrate_v1_to_v2(v1: DocumentV1) -> DocumentV2 {
    DocumentV2 {
        static_parse_early: v1.records,
        ..DocumentV2::default()
    }
}

fn step_v1_to_v2(doc: Document) -> Document {
    match doc {
        Document::V1(v1) => Document::V2(migrate_v1_to_v2(v1)),
        other => other,
    }
}

/// Apply migrations until the document is at the current version
pub fn to_current(mut doc: Document) -> Result<DocumentV2, ParseError> {
    loop {
        if let Document::V2(v2) = doc {
            debug_assert_eq!(CURRENT_VERSION, 2);
            return Ok(v2);
        }
        let from = doc.version();
        let step = MIGRATIONS
            .iter()
            .find(|(version, _)| *version == from)
            .map(|(_, step)| *step)
            .ok_or(ParseError::UnsupportedVersion(from))?;
        doc = step(doc);
        debug_assert!(doc.version() > from, "Postcondition: migration must advance the version");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Provenance, Record};

    #[test]
    fn test_v1_records_become_static_parse_early() {
        let mut v1 = DocumentV1::default();
        let r = Record::new("x", "1", false, &Provenance::new("root", "localhost"), 10);
        v1.records.insert(r.name.clone(), r.clone());

        let v2 = to_current(Document::V1(v1)).unwrap();
        assert_eq!(v2.static_parse_early.get("x"), Some(&r));
        assert!(v2.static_vars.is_empty());
        assert!(v2.dynamic_vars.is_empty());
        assert!(v2.sensitive.is_none());
    }

    #[test]
    fn test_v2_is_unchanged() {
        let mut v2 = DocumentV2::default();
        let r = Record::new("y", "2", false, &Provenance::default(), 1);
        v2.dynamic_vars.insert(r.name.clone(), r);
        assert_eq!(to_current(Document::V2(v2.clone())).unwrap(), v2);
    }
}
