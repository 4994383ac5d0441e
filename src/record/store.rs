//! Record Store
//!
//! One table keyed by lower-cased name. Each entry carries its partition tag,
//! so partition exclusivity holds by construction: moving a name to another
//! partition replaces the old entry.
//!
//! The store is not synchronized itself; the owning service guards it with
//! a single mutex.

use super::{normalize_name, Micros, Partition, PartitionTag, Record, VariableClass};
use crate::vault::{KeyMaterial, SealedBlob};
use std::collections::BTreeMap;

/// A record plus its placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: Record,
    pub tag: PartitionTag,
    /// False for alias mirrors reconstructed in memory only
    pub durable: bool,
}

impl StoredRecord {
    pub fn partition(&self) -> Partition {
        self.tag.partition()
    }
}

/// In-memory record store (all partitions)
#[derive(Debug, Default)]
pub struct RecordStore {
    entries: BTreeMap<String, StoredRecord>,
    /// Wrapped file key; present only while sensitive records exist
    pub key_material: Option<KeyMaterial>,
    /// Sealed sections a load could not open. Written back unchanged by
    /// every flush until the keyring can open them again.
    pub unopened_sealed: Option<SealedBlob>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a durable record.
    ///
    /// Static records overwrite the entry in place. Dynamic records are
    /// removed first and inserted fresh; identity is the name only.
    pub fn put(&mut self, record: Record, tag: PartitionTag) -> Option<StoredRecord> {
        self.insert(record, tag, true)
    }

    /// Insert an in-memory-only alias mirror. Never serialized.
    pub fn put_mirror(&mut self, record: Record, tag: PartitionTag) -> Option<StoredRecord> {
        self.insert(record, tag, false)
    }

    fn insert(&mut self, record: Record, tag: PartitionTag, durable: bool) -> Option<StoredRecord> {
        debug_assert_eq!(
            record.name,
            normalize_name(&record.name),
            "Precondition: record names are stored lower-cased"
        );

        let entry = StoredRecord {
            record,
            tag,
            durable,
        };
        let previous = match tag.class {
            VariableClass::Static => self.entries.insert(entry.record.name.clone(), entry),
            VariableClass::Dynamic => {
                let previous = self.entries.remove(&entry.record.name);
                self.entries.insert(entry.record.name.clone(), entry);
                previous
            }
        };

        #[cfg(debug_assertions)]
        self.verify_invariants();

        previous
    }

    pub fn get(&self, name: &str) -> Option<&StoredRecord> {
        self.entries.get(&normalize_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<StoredRecord> {
        self.entries.remove(&normalize_name(name))
    }

    /// Drop every record, unopened sealed sections included. Key material
    /// is kept so the file key can be reused.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unopened_sealed = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredRecord> {
        self.entries.values()
    }

    /// Records of one partition, mirrors included
    pub fn partition(&self, partition: Partition) -> impl Iterator<Item = &Record> {
        self.entries
            .values()
            .filter(move |e| e.partition() == partition)
            .map(|e| &e.record)
    }

    /// Durable records of one partition, keyed by name (what gets written to disk)
    pub fn durable_section(&self, partition: Partition) -> BTreeMap<String, Record> {
        self.entries
            .values()
            .filter(|e| e.durable && e.partition() == partition)
            .map(|e| (e.record.name.clone(), e.record.clone()))
            .collect()
    }

    pub fn has_class(&self, class: VariableClass) -> bool {
        self.entries.values().any(|e| e.tag.class == class)
    }

    pub fn has_sensitive(&self) -> bool {
        self.entries.values().any(|e| e.durable && e.tag.sensitive)
    }

    /// Records of the given partitions ordered by timestamp ascending.
    ///
    /// The returned iterator owns a snapshot and is `Clone`, so it can be
    /// restarted without touching the store again. Ties break by name.
    pub fn sorted_by_timestamp(&self, partitions: &[Partition]) -> std::vec::IntoIter<Record> {
        self.sorted_where(|e| partitions.contains(&e.partition()))
    }

    /// Like `sorted_by_timestamp`, alias mirrors excluded
    pub fn durable_sorted_by_timestamp(&self, partitions: &[Partition]) -> std::vec::IntoIter<Record> {
        self.sorted_where(|e| e.durable && partitions.contains(&e.partition()))
    }

    fn sorted_where(&self, keep: impl Fn(&StoredRecord) -> bool) -> std::vec::IntoIter<Record> {
        let mut records: Vec<Record> = self
            .entries
            .values()
            .filter(|e| keep(e))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });
        records.into_iter()
    }

    /// Newest timestamp in the store (0 when empty)
    pub fn max_timestamp(&self) -> Micros {
        self.entries
            .values()
            .map(|e| e.record.timestamp)
            .max()
            .unwrap_or(0)
    }

    /// TigerStyle: Verify all invariants hold
    ///
    /// # Invariants
    /// - Table keys equal the record name and are lower-case
    /// - Sensitive entries are never tagged parse-early
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        for (key, entry) in &self.entries {
            debug_assert_eq!(
                key, &entry.record.name,
                "Invariant violated: table key must equal record name"
            );
            debug_assert_eq!(
                key,
                &normalize_name(key),
                "Invariant violated: names must be lower-case"
            );
            debug_assert!(
                !(entry.tag.sensitive && entry.tag.parse_early),
                "Invariant violated: sensitive record {} tagged parse-early",
                key
            );
        }
    }
}
