//! Persisted Variables Service
//!
//! One `PersistedVariables` per process, constructed by `init` and passed by
//! reference to every caller. It owns the record store and the durable file.
//!
//! ## Locking
//!
//! ```text
//! store: Mutex<RecordStore>      set / reset / listing hold only this
//! file:  Mutex<DurableFile<S>>   flush takes it after the store lock
//! ```
//!
//! The store lock is always taken first. Startup work (`load`, bootstrap
//! replay) goes through `&mut self` and `Mutex::get_mut`, so it never locks.
//!
//! `set_variable` and `reset_persisted_variables` only mutate memory; the
//! caller flushes explicitly. A failed flush keeps the in-memory change, so
//! retrying `flush` alone is enough.

pub mod clock;
pub mod config;
pub mod dst;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PersistConfig, DEFAULT_FILE_NAME, DEFAULT_MASTER_KEY_ID};

use crate::codec::{self, Document, DocumentV2, SensitiveEnvelope, SensitiveSections};
use crate::error::{PersistError, Result};
use crate::record::{
    normalize_bool, normalize_name, Micros, Partition, Provenance, Record, RecordStore,
    StoredRecord, VariableClass,
};
use crate::registry::{PersistAction, PrivilegeChecker, Session, VariableRegistry};
use crate::storage::{DurableFile, FileStore, Loaded};
use crate::vault::{CryptoError, Keyring, SensitiveVault};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Scope passed to the privilege checker for reset-all
pub const RESET_ALL_SCOPE: &str = "*";

/// External services the store depends on
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn VariableRegistry>,
    pub keyring: Arc<dyn Keyring>,
    pub privileges: Arc<dyn PrivilegeChecker>,
}

/// Outcome of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStats {
    /// On-disk format version before migration (0 when no file)
    pub version: u64,
    pub records: usize,
    pub sensitive_records: usize,
    /// Sealed sections could not be opened and were carried over unread
    pub sealed_unopened: bool,
    pub recovered_from_shadow: bool,
}

/// Persisted variables service
pub struct PersistedVariables<S: FileStore> {
    config: PersistConfig,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    store: Mutex<RecordStore>,
    file: Mutex<DurableFile<S>>,
}

impl<S: FileStore> PersistedVariables<S> {
    /// Construct the service and, unless disabled, load the persisted file
    pub fn init(config: PersistConfig, file_store: S, collaborators: Collaborators) -> Result<Self> {
        Self::init_with_clock(config, file_store, collaborators, Arc::new(SystemClock))
    }

    pub fn init_with_clock(
        config: PersistConfig,
        file_store: S,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let file = DurableFile::new(file_store, config.file_name.clone());
        let mut vars = PersistedVariables {
            config,
            collaborators,
            clock,
            store: Mutex::new(RecordStore::new()),
            file: Mutex::new(file),
        };

        if vars.config.load_on_startup {
            vars.load()?;
        } else {
            info!(file = %vars.config.file_name, "Skipping persisted variables load");
        }
        Ok(vars)
    }

    /// Drop all in-memory state. Nothing is flushed.
    pub fn shutdown(self) {
        let mut store = self.store.into_inner();
        let records = store.len();
        store.clear();
        store.key_material = None;
        debug!(records, "Persisted variables shut down");
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn VariableRegistry> {
        &self.collaborators.registry
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Record a `SET PERSIST` value with an explicit timestamp.
    ///
    /// The partition comes from the registry's metadata. Sensitive variables
    /// need an available keyring unless plaintext fallback is configured.
    pub fn set_variable(
        &self,
        name: &str,
        value: &str,
        is_null: bool,
        who: &Provenance,
        when: Micros,
    ) -> Result<()> {
        let registry = &self.collaborators.registry;
        let mut name = normalize_name(name);
        let mut info = registry
            .lookup(&name)
            .ok_or_else(|| PersistError::UnknownVariable(name.clone()))?;

        // A deprecated spelling persists under its canonical name
        if let Some(canonical) = info.deprecated_for.clone() {
            info = registry
                .lookup(&canonical)
                .ok_or_else(|| PersistError::UnknownVariable(canonical.clone()))?;
            name = canonical;
        }

        if info.is_persist_readonly {
            return Err(PersistError::NotPersistable(name));
        }

        if info.is_sensitive && !self.collaborators.keyring.available() {
            if !self.config.persist_sensitive_variables_in_plaintext {
                return Err(CryptoError::KeyringUnavailable.into());
            }
            warn!(
                name = %name,
                "Keyring unavailable, sensitive variable will be persisted in plaintext"
            );
        }

        let value = if info.is_boolean && !is_null {
            normalize_bool(value)
        } else {
            value.to_string()
        };
        let record = Record::new(&name, &value, is_null, who, when);
        let tag = info.tag();

        let mirror = info.alias.as_ref().map(|alias| (record.renamed(&alias.name), alias.deprecated));

        let mut store = self.store.lock();
        store.put(record, tag);
        match mirror {
            Some((mirror, true)) => {
                store.put_mirror(mirror, tag);
            }
            Some((mirror, false)) => {
                store.put(mirror, tag);
            }
            None => {}
        }
        debug!(name = %name, partition = ?tag.partition(), "Persisted variable set");
        Ok(())
    }

    /// `set_variable` stamped with the service clock
    pub fn set_variable_now(&self, name: &str, value: &str, is_null: bool, who: &Provenance) -> Result<()> {
        let now = self.clock.now_micros();
        self.set_variable(name, value, is_null, who, now)
    }

    /// `RESET PERSIST [[IF EXISTS] name]`.
    ///
    /// Returns whether anything was removed; callers flush only if so.
    /// A single name needs the removal privilege of its class. Reset-all
    /// needs the dynamic privilege, plus the static one if any static
    /// record is present.
    pub fn reset_persisted_variables(
        &self,
        session: &Session,
        name: Option<&str>,
        if_exists: bool,
    ) -> Result<bool> {
        let privileges = &self.collaborators.privileges;
        let Some(name) = name else {
            let mut store = self.store.lock();
            if store.has_class(VariableClass::Static) {
                authorize(&**privileges, session, PersistAction::RemoveStatic, RESET_ALL_SCOPE)?;
            }
            authorize(&**privileges, session, PersistAction::RemoveDynamic, RESET_ALL_SCOPE)?;
            let changed = !store.is_empty() || store.unopened_sealed.is_some();
            store.clear();
            info!(user = %session.user, "Reset all persisted variables");
            return Ok(changed);
        };

        let mut name = normalize_name(name);
        let info = self.collaborators.registry.lookup(&name);
        if let Some(canonical) = info.as_ref().and_then(|i| i.deprecated_for.clone()) {
            name = canonical;
        }
        let alias = self
            .collaborators
            .registry
            .lookup(&name)
            .and_then(|i| i.alias)
            .map(|a| a.name);

        let mut store = self.store.lock();
        let Some(entry) = store.get(&name) else {
            if if_exists {
                warn!(name = %name, "Variable does not exist in persisted config file");
                return Ok(false);
            }
            return Err(PersistError::NotFound(name));
        };

        let action = match entry.tag.class {
            VariableClass::Static => PersistAction::RemoveStatic,
            VariableClass::Dynamic => PersistAction::RemoveDynamic,
        };
        authorize(&**privileges, session, action, &name)?;

        store.remove(&name);
        if let Some(alias) = alias {
            store.remove(&alias);
        }
        debug!(name = %name, "Persisted variable reset");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Durability
    // ------------------------------------------------------------------------

    /// Serialize the store and write it with the shadow-file protocol.
    ///
    /// Sensitive sections are sealed under the file key. Without a keyring
    /// the flush fails with `KeyringUnavailable`, unless plaintext fallback
    /// is configured. Once no sensitive record remains the key material is
    /// dropped from the document.
    pub fn flush(&self) -> Result<()> {
        let mut store = self.store.lock();
        let doc = self.build_document(&mut store)?;
        let bytes = codec::serialize(&Document::V2(doc));

        let file = self.file.lock();
        file.flush(&bytes)?;
        debug!(records = store.len(), bytes = bytes.len(), "Persisted variables flushed");
        Ok(())
    }

    fn build_document(&self, store: &mut RecordStore) -> Result<DocumentV2> {
        let mut doc = DocumentV2 {
            static_parse_early: store.durable_section(Partition::StaticParseEarly),
            dynamic_parse_early: store.durable_section(Partition::DynamicParseEarly),
            static_vars: store.durable_section(Partition::Static),
            dynamic_vars: store.durable_section(Partition::Dynamic),
            sensitive: None,
        };

        let vault = SensitiveVault::new(&*self.collaborators.keyring, &self.config.master_key_id);
        if store.unopened_sealed.is_some() && vault.is_available() {
            reopen_sealed(&vault, store);
        }

        if !store.has_sensitive() && store.unopened_sealed.is_none() {
            store.key_material = None;
            return Ok(doc);
        }

        let sections = SensitiveSections {
            static_vars: store.durable_section(Partition::SensitiveStatic),
            dynamic_vars: store.durable_section(Partition::SensitiveDynamic),
        };
        let plaintext_allowed = self.config.persist_sensitive_variables_in_plaintext;

        doc.sensitive = Some(if let Some(unopened) = &store.unopened_sealed {
            // Written back as read; current records cannot join a blob we cannot open
            if !sections.is_empty() && !plaintext_allowed {
                return Err(CryptoError::KeyringUnavailable.into());
            }
            warn!(
                records = sections.len(),
                "Sealed sensitive variables still unreadable, keeping them unchanged"
            );
            SensitiveEnvelope {
                key_material: store.key_material.clone(),
                sealed: Some(unopened.clone()),
                plaintext: (!sections.is_empty()).then_some(sections),
            }
        } else if vault.is_available() {
            let sealed = vault.seal_sections(&mut store.key_material, &sections)?;
            SensitiveEnvelope {
                key_material: store.key_material.clone(),
                sealed: Some(sealed),
                plaintext: None,
            }
        } else if plaintext_allowed {
            warn!(
                records = sections.len(),
                "Keyring unavailable, writing sensitive variables in plaintext"
            );
            SensitiveEnvelope {
                key_material: store.key_material.clone(),
                sealed: None,
                plaintext: Some(sections),
            }
        } else {
            warn!(
                records = sections.len(),
                "Keyring unavailable, refusing to write sensitive variables in plaintext"
            );
            return Err(CryptoError::KeyringUnavailable.into());
        });
        Ok(doc)
    }

    /// Replace the in-memory store with the file's content.
    ///
    /// Completes an interrupted flush first. A V1 file is migrated in memory;
    /// the file itself changes only on the next flush. Any parse failure
    /// aborts the load and leaves the store untouched. So does a sealed blob
    /// that cannot be opened, unless plaintext fallback is configured: then
    /// the sealed sections are skipped and kept for the next flush.
    pub fn load(&mut self) -> Result<LoadStats> {
        let loaded = self
            .file
            .get_mut()
            .load(|bytes| codec::parse(bytes).map_err(PersistError::from))?;

        let Some(Loaded {
            value: document,
            recovered_from_shadow,
        }) = loaded
        else {
            info!(file = %self.config.file_name, "No persisted variables file");
            return Ok(LoadStats::default());
        };

        let version = document.version();
        let doc = codec::to_current(document)?;
        if version < codec::CURRENT_VERSION {
            info!(from = version, to = codec::CURRENT_VERSION, "Migrated persisted variables in memory");
        }

        let mut store = RecordStore::new();
        for partition in [
            Partition::StaticParseEarly,
            Partition::DynamicParseEarly,
            Partition::Static,
            Partition::Dynamic,
        ] {
            if let Some(section) = doc.section(partition) {
                for record in section.values() {
                    store.put(record.clone(), partition.tag());
                }
            }
        }

        let mut sensitive_records = 0;
        let mut sealed_unopened = false;
        if let Some(envelope) = doc.sensitive {
            let mut sections = SensitiveSections::default();
            if let (Some(material), Some(sealed)) = (&envelope.key_material, &envelope.sealed) {
                let vault = SensitiveVault::new(&*self.collaborators.keyring, &self.config.master_key_id);
                match vault.open_sections(material, sealed) {
                    Ok(opened) => {
                        sections.static_vars.extend(opened.static_vars);
                        sections.dynamic_vars.extend(opened.dynamic_vars);
                    }
                    Err(err) if self.config.persist_sensitive_variables_in_plaintext => {
                        warn!(
                            error = %err,
                            "Cannot open sealed sensitive variables, continuing without them"
                        );
                        store.unopened_sealed = Some(sealed.clone());
                        sealed_unopened = true;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            // Plaintext copies next to a sealed blob were written after it
            if let Some(plaintext) = envelope.plaintext {
                sections.static_vars.extend(plaintext.static_vars);
                sections.dynamic_vars.extend(plaintext.dynamic_vars);
            }
            sensitive_records = sections.len();
            for record in sections.static_vars.into_values() {
                store.put(record, Partition::SensitiveStatic.tag());
            }
            for record in sections.dynamic_vars.into_values() {
                store.put(record, Partition::SensitiveDynamic.tag());
            }
            store.key_material = envelope.key_material;
        }

        self.restore_alias_mirrors(&mut store);

        let stats = LoadStats {
            version,
            records: store.iter().filter(|e| e.durable).count(),
            sensitive_records,
            sealed_unopened,
            recovered_from_shadow,
        };
        *self.store.get_mut() = store;

        info!(
            version = stats.version,
            records = stats.records,
            sensitive = stats.sensitive_records,
            sealed_unopened = stats.sealed_unopened,
            recovered = stats.recovered_from_shadow,
            "Loaded persisted variables"
        );
        Ok(stats)
    }

    /// Deprecated aliases are never written; rebuild their mirrors
    fn restore_alias_mirrors(&self, store: &mut RecordStore) {
        let registry = &self.collaborators.registry;
        let mirrors: Vec<_> = store
            .iter()
            .filter_map(|entry| {
                let alias = registry.lookup(&entry.record.name)?.alias?;
                (alias.deprecated && !store.contains(&alias.name))
                    .then(|| (entry.record.renamed(&alias.name), entry.tag))
            })
            .collect();
        for (record, tag) in mirrors {
            store.put_mirror(record, tag);
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Records of the given partitions, oldest first.
    ///
    /// The iterator owns a snapshot taken under the store lock and can be
    /// cloned to restart it.
    pub fn sorted_by_timestamp(&self, partitions: &[Partition]) -> std::vec::IntoIter<Record> {
        self.store.lock().sorted_by_timestamp(partitions)
    }

    /// Run `f` against the store under the store lock
    pub fn with_records<R>(&self, f: impl FnOnce(&RecordStore) -> R) -> R {
        f(&self.store.lock())
    }

    /// Lock-free access during single-threaded startup
    pub fn records_exclusive(&mut self) -> &RecordStore {
        self.store.get_mut()
    }

    /// Every entry with its partition, ordered by name
    pub fn snapshot(&self) -> Vec<StoredRecord> {
        self.store.lock().iter().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<StoredRecord> {
        self.store.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Whether wrapped key material is currently held
    pub fn has_key_material(&self) -> bool {
        self.store.lock().key_material.is_some()
    }

    /// Whether sealed sections from the last load are still unread
    pub fn has_unopened_sealed(&self) -> bool {
        self.store.lock().unopened_sealed.is_some()
    }
}

/// Merge sections a load could not open, once the keyring can open them.
/// Records set since the load win over the sealed copies.
fn reopen_sealed(vault: &SensitiveVault<'_>, store: &mut RecordStore) {
    let (Some(material), Some(blob)) = (store.key_material.clone(), store.unopened_sealed.clone()) else {
        return;
    };
    let opened = match vault.open_sections(&material, &blob) {
        Ok(opened) => opened,
        Err(err) => {
            debug!(error = %err, "Sealed sensitive variables still unreadable");
            return;
        }
    };

    let mut restored = 0;
    for (section, partition) in [
        (opened.static_vars, Partition::SensitiveStatic),
        (opened.dynamic_vars, Partition::SensitiveDynamic),
    ] {
        for record in section.into_values() {
            if !store.contains(&record.name) {
                store.put(record, partition.tag());
                restored += 1;
            }
        }
    }
    store.unopened_sealed = None;
    info!(restored, "Opened sealed sensitive variables left unread at load");
}

fn authorize(
    privileges: &dyn PrivilegeChecker,
    session: &Session,
    action: PersistAction,
    scope: &str,
) -> Result<()> {
    if privileges.authorize(session, action, scope) {
        return Ok(());
    }
    warn!(user = %session.user, host = %session.host, ?action, scope, "Reset persist denied");
    Err(PersistError::PermissionDenied {
        user: session.user.clone(),
        host: session.host.clone(),
        action: format!("{:?}", action),
        scope: scope.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AllowAll, InMemoryRegistry, VariableInfo};
    use crate::storage::InMemoryFileStore;
    use crate::vault::InMemoryKeyring;

    fn service(registry: Arc<InMemoryRegistry>) -> (PersistedVariables<InMemoryFileStore>, InMemoryFileStore) {
        let files = InMemoryFileStore::new();
        let collaborators = Collaborators {
            registry,
            keyring: Arc::new(InMemoryKeyring::new()),
            privileges: Arc::new(AllowAll),
        };
        let vars = PersistedVariables::init(PersistConfig::default(), files.clone(), collaborators).unwrap();
        (vars, files)
    }

    fn root() -> Provenance {
        Provenance::new("root", "localhost")
    }

    #[test]
    fn test_set_places_by_metadata() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("max_connections", VariableInfo::dynamic());
        registry.register("innodb_log_file_size", VariableInfo::static_var());
        let (vars, _) = service(registry);

        vars.set_variable("max_connections", "500", false, &root(), 1).unwrap();
        vars.set_variable("innodb_log_file_size", "1024", false, &root(), 2).unwrap();

        assert_eq!(vars.get("max_connections").unwrap().partition(), Partition::Dynamic);
        assert_eq!(vars.get("INNODB_LOG_FILE_SIZE").unwrap().partition(), Partition::Static);
    }

    #[test]
    fn test_set_unknown_and_readonly() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("port", VariableInfo::static_var().persist_readonly());
        let (vars, _) = service(registry);

        assert!(matches!(
            vars.set_variable("nope", "1", false, &root(), 1),
            Err(PersistError::UnknownVariable(_))
        ));
        assert!(matches!(
            vars.set_variable("port", "3307", false, &root(), 1),
            Err(PersistError::NotPersistable(_))
        ));
        assert!(vars.is_empty());
    }

    #[test]
    fn test_boolean_normalized() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("autocommit", VariableInfo::dynamic().boolean());
        let (vars, _) = service(registry);

        vars.set_variable("autocommit", "true", false, &root(), 1).unwrap();
        assert_eq!(vars.get("autocommit").unwrap().record.value, "ON");
        vars.set_variable("autocommit", "0", false, &root(), 2).unwrap();
        assert_eq!(vars.get("autocommit").unwrap().record.value, "OFF");
    }

    #[test]
    fn test_dynamic_update_replaces_record() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("max_connections", VariableInfo::dynamic());
        let (vars, _) = service(registry);

        vars.set_variable("max_connections", "100", false, &root(), 1).unwrap();
        vars.set_variable("max_connections", "200", false, &Provenance::new("admin", "%"), 2).unwrap();

        let entry = vars.get("max_connections").unwrap();
        assert_eq!(entry.record.value, "200");
        assert_eq!(entry.record.user, "admin");
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_reset_missing() {
        let (vars, _) = service(Arc::new(InMemoryRegistry::new()));
        let session = Session::new("root", "localhost");
        assert!(matches!(
            vars.reset_persisted_variables(&session, Some("x"), false),
            Err(PersistError::NotFound(_))
        ));
        assert!(!vars.reset_persisted_variables(&session, Some("x"), true).unwrap());
        assert!(!vars.reset_persisted_variables(&session, None, false).unwrap());
    }

    #[test]
    fn test_flush_without_changes_is_byte_stable() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("max_connections", VariableInfo::dynamic());
        let (vars, files) = service(registry);

        vars.set_variable("max_connections", "500", false, &root(), 1).unwrap();
        vars.flush().unwrap();
        let first = files.get_file_data(DEFAULT_FILE_NAME).unwrap();
        vars.flush().unwrap();
        assert_eq!(files.get_file_data(DEFAULT_FILE_NAME).unwrap(), first);
    }

    #[test]
    fn test_sorted_by_timestamp_is_restartable() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register("a", VariableInfo::dynamic());
        registry.register("b", VariableInfo::dynamic());
        let (vars, _) = service(registry);
        vars.set_variable("a", "1", false, &root(), 20).unwrap();
        vars.set_variable("b", "1", false, &root(), 10).unwrap();

        let iter = vars.sorted_by_timestamp(&[Partition::Dynamic]);
        let first: Vec<_> = iter.clone().map(|r| r.name).collect();
        let second: Vec<_> = iter.map(|r| r.name).collect();
        assert_eq!(first, vec!["b", "a"]);
        assert_eq!(first, second);
    }
}
