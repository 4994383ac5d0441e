//! Bootstrap Integration Tests
//!
//! Startup replay of persisted records: option synthesis for parse-early and
//! static records, registry application for dynamic ones, and pending
//! records picked up after a plugin registers.

use persisted_vars::bootstrap::{append_static_options, inject_parse_early, BootstrapApplier};
use persisted_vars::registry::AllowAll;
use persisted_vars::{
    Collaborators, InMemoryFileStore, InMemoryKeyring, InMemoryRegistry, PersistConfig,
    PersistedVariables, Provenance, VariableInfo, ARGS_SEPARATOR,
};
use std::sync::Arc;

fn registry() -> Arc<InMemoryRegistry> {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.register("innodb_buffer_pool_size", VariableInfo::static_var().parse_early());
    registry.register("innodb_log_file_size", VariableInfo::static_var());
    registry.register("max_connections", VariableInfo::dynamic());
    registry.register("wait_timeout", VariableInfo::dynamic());
    registry.register("plugin_secret", VariableInfo::dynamic().sensitive());
    registry.register("plugin_level", VariableInfo::dynamic());
    registry
}

fn collaborators(registry: Arc<InMemoryRegistry>, keyring: Arc<InMemoryKeyring>) -> Collaborators {
    Collaborators {
        registry,
        keyring,
        privileges: Arc::new(AllowAll),
    }
}

/// Persist a set of variables, then restart with a registry that has not
/// loaded the plugin yet.
fn persisted_then_restarted() -> (PersistedVariables<InMemoryFileStore>, Arc<InMemoryRegistry>) {
    let files = InMemoryFileStore::new();
    let keyring = Arc::new(InMemoryKeyring::new());
    let who = Provenance::new("root", "localhost");

    let vars = PersistedVariables::init(
        PersistConfig::default(),
        files.clone(),
        collaborators(registry(), keyring.clone()),
    )
    .unwrap();
    vars.set_variable("wait_timeout", "600", false, &who, 300).unwrap();
    vars.set_variable("innodb_log_file_size", "50331648", false, &who, 200).unwrap();
    vars.set_variable("max_connections", "100", false, &who, 100).unwrap();
    vars.set_variable("max_connections", "500", false, &who, 400).unwrap();
    vars.set_variable("innodb_buffer_pool_size", "268435456", false, &who, 50).unwrap();
    vars.set_variable("plugin_secret", "s3cr3t", false, &who, 500).unwrap();
    vars.set_variable("plugin_level", "3", false, &who, 600).unwrap();
    vars.flush().unwrap();
    vars.shutdown();

    let startup_registry = registry();
    startup_registry.unregister("plugin_secret");
    startup_registry.unregister("plugin_level");
    let vars = PersistedVariables::init(
        PersistConfig::default(),
        files,
        collaborators(startup_registry.clone(), keyring),
    )
    .unwrap();
    (vars, startup_registry)
}

#[test]
fn test_startup_option_synthesis() {
    let (mut vars, _) = persisted_then_restarted();
    let store = vars.records_exclusive();

    let mut args = vec!["mysqld".to_string(), "--datadir=/var/lib/mysql".to_string()];
    inject_parse_early(store, &mut args);
    append_static_options(store, &mut args);

    assert_eq!(
        args,
        vec![
            "mysqld",
            "--innodb_buffer_pool_size=268435456",
            "--datadir=/var/lib/mysql",
            ARGS_SEPARATOR,
            "--innodb_log_file_size=50331648",
        ]
    );
}

#[test]
fn test_dynamic_replay_then_plugin_registration() {
    let (mut vars, registry) = persisted_then_restarted();
    let mut applier = BootstrapApplier::new(registry.clone());

    let report = applier.apply_dynamic(vars.records_exclusive());
    assert_eq!(report.applied, vec!["wait_timeout", "max_connections"]);
    assert_eq!(report.pending, vec!["plugin_secret", "plugin_level"]);
    assert_eq!(registry.current_value("max_connections").as_deref(), Some("500"));

    // Plugin installs its variables at runtime; replay happens under the store lock
    registry.register("plugin_secret", VariableInfo::dynamic().sensitive());
    registry.register("plugin_level", VariableInfo::dynamic());
    let report = applier.retry_pending();
    assert_eq!(report.applied, vec!["plugin_secret", "plugin_level"]);
    assert!(applier.pending().is_empty());
    assert_eq!(registry.current_value("plugin_secret").as_deref(), Some("s3cr3t"));

    let names: Vec<_> = registry.applied().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["wait_timeout", "max_connections", "plugin_secret", "plugin_level"]);
}

#[test]
fn test_dynamic_replay_under_lock_after_startup() {
    let (vars, registry) = persisted_then_restarted();
    let mut applier = BootstrapApplier::new(registry.clone());

    let report = vars.with_records(|store| applier.apply_dynamic(store));
    assert_eq!(report.applied.len(), 2);
    assert_eq!(applier.discard_pending().len(), 2);
}

#[test]
fn test_replay_order_independent_of_insertion_order() {
    let files = InMemoryFileStore::new();
    let registry = registry();
    let vars = PersistedVariables::init(
        PersistConfig::default(),
        files,
        collaborators(registry.clone(), Arc::new(InMemoryKeyring::new())),
    )
    .unwrap();
    let who = Provenance::new("root", "localhost");
    // Inserted newest first
    vars.set_variable("wait_timeout", "3", false, &who, 30).unwrap();
    vars.set_variable("max_connections", "2", false, &who, 20).unwrap();
    vars.set_variable("plugin_level", "1", false, &who, 10).unwrap();

    let mut applier = BootstrapApplier::new(registry.clone());
    vars.with_records(|store| applier.apply_dynamic(store));
    let names: Vec<_> = registry.applied().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["plugin_level", "max_connections", "wait_timeout"]);
}
