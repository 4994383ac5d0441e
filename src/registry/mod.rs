//! Variable Registry Contract
//!
//! The live variable registry is an external collaborator: it knows each
//! variable's metadata and applies values with the same validation as an
//! interactive `SET`. `InMemoryRegistry` is the implementation used by tests,
//! DST and bootstrap replay.

pub mod privilege;

pub use privilege::{AllowAll, PersistAction, PrivilegeChecker, Session, StaticPrivileges};

use crate::record::{normalize_name, PartitionTag, Record, VariableClass};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// The other name of an aliased variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    /// The alias name is a deprecated spelling of this variable. Its record
    /// is mirrored in memory only, never persisted.
    pub deprecated: bool,
}

/// Metadata the registry exposes per variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub is_static: bool,
    pub is_sensitive: bool,
    pub is_parse_early: bool,
    /// Cannot be persisted at all
    pub is_persist_readonly: bool,
    /// Values are normalized to `ON`/`OFF`
    pub is_boolean: bool,
    pub alias: Option<Alias>,
    /// Set on a deprecated name: the canonical name it stands for
    pub deprecated_for: Option<String>,
}

impl VariableInfo {
    pub fn dynamic() -> Self {
        VariableInfo {
            is_static: false,
            is_sensitive: false,
            is_parse_early: false,
            is_persist_readonly: false,
            is_boolean: false,
            alias: None,
            deprecated_for: None,
        }
    }

    pub fn static_var() -> Self {
        VariableInfo {
            is_static: true,
            ..Self::dynamic()
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    pub fn parse_early(mut self) -> Self {
        self.is_parse_early = true;
        self
    }

    pub fn persist_readonly(mut self) -> Self {
        self.is_persist_readonly = true;
        self
    }

    pub fn boolean(mut self) -> Self {
        self.is_boolean = true;
        self
    }

    pub fn class(&self) -> VariableClass {
        if self.is_static {
            VariableClass::Static
        } else {
            VariableClass::Dynamic
        }
    }

    /// Partition a record of this variable belongs in
    pub fn tag(&self) -> PartitionTag {
        PartitionTag::new(self.class(), self.is_sensitive, self.is_parse_early)
    }
}

/// Why the registry refused a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The name is not (yet) registered, e.g. its plugin is not loaded
    #[error("unknown system variable '{0}'")]
    Unknown(String),
    #[error("variable '{name}' can't be set to '{value}': {reason}")]
    Rejected {
        name: String,
        value: String,
        reason: String,
    },
}

/// External variable registry
pub trait VariableRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<VariableInfo>;

    /// Validate and apply a persisted value through the normal `SET` path
    fn validate_and_apply(&self, record: &Record) -> Result<(), ApplyError>;
}

/// In-memory registry with applied-value tracking
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    variables: RwLock<HashMap<String, VariableInfo>>,
    /// Values that validation refuses, with the reason
    rejections: RwLock<HashMap<(String, String), String>>,
    applied: Mutex<Vec<Record>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, info: VariableInfo) {
        self.variables.write().insert(normalize_name(name), info);
    }

    /// Register `canonical` together with its alias.
    ///
    /// With `deprecated` the alias name forwards to the canonical variable;
    /// otherwise both names are peers that mirror each other.
    pub fn register_with_alias(&self, canonical: &str, info: VariableInfo, alias: &str, deprecated: bool) {
        let canonical = normalize_name(canonical);
        let alias = normalize_name(alias);

        let mut canonical_info = info.clone();
        canonical_info.alias = Some(Alias {
            name: alias.clone(),
            deprecated,
        });

        let mut alias_info = info;
        alias_info.alias = Some(Alias {
            name: canonical.clone(),
            deprecated: false,
        });
        if deprecated {
            alias_info.deprecated_for = Some(canonical.clone());
        }

        let mut variables = self.variables.write();
        variables.insert(canonical, canonical_info);
        variables.insert(alias, alias_info);
    }

    /// Drop a variable, as when its plugin is uninstalled
    pub fn unregister(&self, name: &str) -> Option<VariableInfo> {
        self.variables.write().remove(&normalize_name(name))
    }

    /// Make validation refuse `value` for `name`
    pub fn reject_value(&self, name: &str, value: &str, reason: &str) {
        self.rejections
            .write()
            .insert((normalize_name(name), value.to_string()), reason.to_string());
    }

    /// Every record applied so far, in application order
    pub fn applied(&self) -> Vec<Record> {
        self.applied.lock().clone()
    }

    /// Current value of a variable as last applied
    pub fn current_value(&self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        self.applied
            .lock()
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.value.clone())
    }
}

impl VariableRegistry for InMemoryRegistry {
    fn lookup(&self, name: &str) -> Option<VariableInfo> {
        self.variables.read().get(&normalize_name(name)).cloned()
    }

    fn validate_and_apply(&self, record: &Record) -> Result<(), ApplyError> {
        if !self.variables.read().contains_key(&record.name) {
            return Err(ApplyError::Unknown(record.name.clone()));
        }
        let key = (record.name.clone(), record.value.clone());
        if let Some(reason) = self.rejections.read().get(&key) {
            return Err(ApplyError::Rejected {
                name: record.name.clone(),
                value: record.value.clone(),
                reason: reason.clone(),
            });
        }
        self.applied.lock().push(record.clone());
        Ok(())
    }
}
