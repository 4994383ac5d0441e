//! Bootstrap Applier
//!
//! Replays persisted records at startup, oldest first, so the resulting
//! configuration does not depend on on-disk order.
//!
//! ```text
//! argv[0] --pe1=v --pe2=v <command line ...> ----args-separator---- --s1=v --s2=v
//!         \_ pass 1 ___/                                          \_ pass 2 ___/
//! ```
//!
//! Dynamic records do not become options: they go through the registry's
//! normal `SET` path. Names the registry does not know yet stay pending until
//! a later plugin or component registration.

use crate::record::{Partition, Record, RecordStore};
use crate::registry::{ApplyError, VariableRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marks where options materialized from persisted state begin
pub const ARGS_SEPARATOR: &str = "----args-separator----";

/// Partitions turned into options before ordinary option parsing
pub const PARSE_EARLY_PARTITIONS: [Partition; 2] =
    [Partition::StaticParseEarly, Partition::DynamicParseEarly];

/// Partitions appended after the separator
pub const STATIC_PARTITIONS: [Partition; 2] = [Partition::Static, Partition::SensitiveStatic];

/// Partitions applied through the registry
pub const DYNAMIC_PARTITIONS: [Partition; 2] = [Partition::Dynamic, Partition::SensitiveDynamic];

/// Outcome of applying dynamic records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    /// Unknown to the registry, kept for a later retry
    pub pending: Vec<String>,
    /// Refused by validation: (name, reason)
    pub dropped: Vec<(String, String)>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty() && self.dropped.is_empty()
    }
}

/// Durable records of the given partitions, oldest first. Alias mirrors
/// are skipped so a value is never applied twice.
fn durable_sorted(store: &RecordStore, partitions: &[Partition]) -> Vec<Record> {
    store.durable_sorted_by_timestamp(partitions).collect()
}

/// `--name=value`; a NULL record becomes `--name=`
pub fn to_option(record: &Record) -> String {
    format!("--{}={}", record.name, record.value_opt().unwrap_or(""))
}

/// Pass 1 options, oldest first
pub fn parse_early_options(store: &RecordStore) -> Vec<String> {
    durable_sorted(store, &PARSE_EARLY_PARTITIONS)
        .iter()
        .map(to_option)
        .collect()
}

/// Insert pass 1 options right after the program name
pub fn inject_parse_early(store: &RecordStore, args: &mut Vec<String>) -> usize {
    let options = parse_early_options(store);
    let count = options.len();
    let at = args.len().min(1);
    args.splice(at..at, options);
    debug!(count, "Injected parse-early persisted options");
    count
}

/// Append the separator and pass 2 options. The separator is written even
/// when there are no static records.
pub fn append_static_options(store: &RecordStore, args: &mut Vec<String>) -> usize {
    args.push(ARGS_SEPARATOR.to_string());
    let before = args.len();
    args.extend(durable_sorted(store, &STATIC_PARTITIONS).iter().map(to_option));
    let count = args.len() - before;
    debug!(count, "Appended static persisted options");
    count
}

/// Applies dynamic records through the registry and tracks pending ones
pub struct BootstrapApplier {
    registry: Arc<dyn VariableRegistry>,
    pending: Vec<Record>,
}

impl BootstrapApplier {
    pub fn new(registry: Arc<dyn VariableRegistry>) -> Self {
        BootstrapApplier {
            registry,
            pending: Vec::new(),
        }
    }

    /// Apply every dynamic record, oldest first
    pub fn apply_dynamic(&mut self, store: &RecordStore) -> ApplyReport {
        let records = durable_sorted(store, &DYNAMIC_PARTITIONS);
        // A name set again since it went pending is superseded
        self.pending.retain(|p| !records.iter().any(|r| r.name == p.name));
        let report = self.apply_all(records);
        info!(
            applied = report.applied.len(),
            pending = report.pending.len(),
            dropped = report.dropped.len(),
            "Applied persisted dynamic variables"
        );
        report
    }

    /// Reapply pending records after a plugin or component registered
    pub fn retry_pending(&mut self) -> ApplyReport {
        let mut records = std::mem::take(&mut self.pending);
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
        let report = self.apply_all(records);
        if !report.applied.is_empty() {
            info!(applied = report.applied.len(), "Applied pending persisted variables");
        }
        report
    }

    /// Give up on records no registration claimed
    pub fn discard_pending(&mut self) -> Vec<Record> {
        let dropped = std::mem::take(&mut self.pending);
        for record in &dropped {
            warn!(name = %record.name, "Dropping persisted variable unknown to the server");
        }
        dropped
    }

    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    fn apply_all(&mut self, records: Vec<Record>) -> ApplyReport {
        let mut report = ApplyReport::default();
        for record in records {
            match self.registry.validate_and_apply(&record) {
                Ok(()) => report.applied.push(record.name),
                Err(ApplyError::Unknown(_)) => {
                    debug!(name = %record.name, "Persisted variable not registered yet");
                    report.pending.push(record.name.clone());
                    self.pending.push(record);
                }
                Err(ApplyError::Rejected { reason, .. }) => {
                    // The value is not logged: the record may be sensitive
                    warn!(name = %record.name, reason = %reason, "Dropping persisted variable");
                    report.dropped.push((record.name, reason));
                }
            }
        }
        report
    }
}
