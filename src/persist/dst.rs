//! Persisted Variables Deterministic Simulation Testing Harness
//!
//! Verifies the flush/load durability contract under fault injection:
//!
//! - **Acknowledged flush survives**: after a crash, the recovered store
//!   equals the state of the last successful flush, or the state of a flush
//!   that failed after it (its shadow or rename may have landed)
//! - **No torn documents**: recovery never fails on a half-written file
//! - **Sealed secrets**: sensitive values never appear in plaintext on disk,
//!   including while the keyring is unavailable
//!
//! ## DST Methodology
//!
//! 1. Run a random set/reset/flush workload against a `SimulatedFileStore`
//! 2. Snapshot the model state at every flush attempt
//! 3. Crash at a random point (un-synced bytes are dropped)
//! 4. Re-init from the surviving files and compare

use super::{Collaborators, ManualClock, PersistConfig, PersistedVariables};
use crate::record::Provenance;
use crate::registry::{AllowAll, InMemoryRegistry, Session, VariableInfo};
use crate::simulator::DeterministicRng;
use crate::storage::{SimulatedFileStore, SimulatedFileStoreConfig, SimulatedFileStoreStats};
use crate::error::PersistError;
use crate::vault::{CryptoError, InMemoryKeyring, Keyring};
use std::collections::BTreeMap;
use std::sync::Arc;

/// name -> (value, is_null)
type ModelState = BTreeMap<String, (String, bool)>;

/// Result of a single DST run
#[derive(Debug)]
pub struct PersistDSTResult {
    pub seed: u64,
    pub total_ops: usize,
    pub sets: usize,
    pub resets: usize,
    pub flushes_ok: usize,
    pub flushes_failed: usize,
    /// Times the keyring went down during the run
    pub keyring_outages: usize,
    pub recovered_records: usize,
    pub recovered_from_shadow: bool,
    pub store_stats: SimulatedFileStoreStats,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// Configuration for the persisted-variables DST harness
#[derive(Debug, Clone)]
pub struct PersistDSTConfig {
    /// Number of operations per run
    pub num_ops: usize,
    /// Size of the variable namespace
    pub num_variables: usize,
    /// Every n-th variable is sensitive (0 disables)
    pub sensitive_every: usize,
    /// Fault injection config
    pub store_config: SimulatedFileStoreConfig,
    /// Whether to simulate a crash mid-run
    pub simulate_crash: bool,
    /// Per-operation probability of flipping keyring availability
    pub keyring_flip_prob: f64,
}

impl Default for PersistDSTConfig {
    fn default() -> Self {
        PersistDSTConfig {
            num_ops: 60,
            num_variables: 12,
            sensitive_every: 4,
            store_config: SimulatedFileStoreConfig::default(),
            simulate_crash: true,
            keyring_flip_prob: 0.05,
        }
    }
}

impl PersistDSTConfig {
    /// No faults, no crash
    pub fn baseline() -> Self {
        PersistDSTConfig {
            store_config: SimulatedFileStoreConfig::no_faults(),
            simulate_crash: false,
            keyring_flip_prob: 0.0,
            ..Default::default()
        }
    }

    /// Crash without faults
    pub fn crash_only() -> Self {
        PersistDSTConfig {
            store_config: SimulatedFileStoreConfig::no_faults(),
            simulate_crash: true,
            ..Default::default()
        }
    }

    /// Faults plus crash
    pub fn chaos() -> Self {
        PersistDSTConfig {
            store_config: SimulatedFileStoreConfig::high_chaos(),
            simulate_crash: true,
            keyring_flip_prob: 0.1,
            ..Default::default()
        }
    }
}

fn variable_name(i: usize) -> String {
    format!("var_{:03}", i)
}

fn secret_value(i: u64) -> String {
    format!("secret-{:08}", i)
}

/// Persisted variables DST harness
pub struct PersistDSTHarness {
    seed: u64,
    rng: DeterministicRng,
    config: PersistDSTConfig,
}

impl PersistDSTHarness {
    pub fn new(seed: u64, config: PersistDSTConfig) -> Self {
        PersistDSTHarness {
            seed,
            rng: DeterministicRng::new(seed),
            config,
        }
    }

    fn registry(&self) -> Arc<InMemoryRegistry> {
        let registry = Arc::new(InMemoryRegistry::new());
        for i in 0..self.config.num_variables {
            let mut info = if i % 2 == 0 {
                VariableInfo::dynamic()
            } else {
                VariableInfo::static_var()
            };
            if i % 3 == 0 {
                info = info.parse_early();
            }
            if self.is_sensitive(i) {
                info = info.sensitive();
            }
            registry.register(&variable_name(i), info);
        }
        registry
    }

    fn is_sensitive(&self, i: usize) -> bool {
        self.config.sensitive_every > 0 && i % self.config.sensitive_every == self.config.sensitive_every - 1
    }

    fn fail(&self, message: String, store: &SimulatedFileStore) -> PersistDSTResult {
        PersistDSTResult {
            seed: self.seed,
            total_ops: self.config.num_ops,
            sets: 0,
            resets: 0,
            flushes_ok: 0,
            flushes_failed: 0,
            keyring_outages: 0,
            recovered_records: 0,
            recovered_from_shadow: false,
            store_stats: store.stats(),
            passed: false,
            error_message: Some(message),
        }
    }

    /// Run a single DST scenario
    pub fn run(&mut self) -> PersistDSTResult {
        let store = SimulatedFileStore::new(self.rng.next_u64(), self.config.store_config.clone());
        let keyring = Arc::new(InMemoryKeyring::new());
        let collaborators = Collaborators {
            registry: self.registry(),
            keyring: keyring.clone(),
            privileges: Arc::new(AllowAll),
        };
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = PersistConfig::default();

        let vars = match PersistedVariables::init_with_clock(
            config.clone(),
            store.clone(),
            collaborators.clone(),
            clock.clone(),
        ) {
            Ok(v) => v,
            Err(e) => return self.fail(format!("init failed: {}", e), &store),
        };

        let who = Provenance::new("root", "localhost");
        let session = Session::new("root", "localhost");
        let mut model = ModelState::new();
        // State of the last successful flush, and of every failed flush after it
        let mut acked = ModelState::new();
        let mut in_doubt: Vec<ModelState> = Vec::new();
        let mut secrets: Vec<String> = Vec::new();
        let (mut sets, mut resets, mut flushes_ok, mut flushes_failed) = (0, 0, 0, 0);
        let mut keyring_outages = 0;

        let crash_at = if self.config.simulate_crash {
            self.rng.gen_range(1, (self.config.num_ops as u64).saturating_add(1)) as usize
        } else {
            usize::MAX
        };

        for op in 0..self.config.num_ops {
            if op == crash_at {
                break;
            }
            clock.advance(self.rng.gen_range(1, 1000));
            if self.rng.gen_bool(self.config.keyring_flip_prob) {
                let available = !keyring.available();
                keyring.set_available(available);
                if !available {
                    keyring_outages += 1;
                }
            }

            match self.rng.gen_range(0, 10) {
                0..=5 => {
                    let i = self.rng.gen_range(0, self.config.num_variables as u64) as usize;
                    let name = variable_name(i);
                    let is_null = self.rng.gen_bool(0.1);
                    let value = if self.is_sensitive(i) {
                        let v = secret_value(self.rng.next_u64() % 100_000_000);
                        secrets.push(v.clone());
                        v
                    } else {
                        format!("{}", self.rng.gen_range(0, 10_000))
                    };
                    match vars.set_variable_now(&name, &value, is_null, &who) {
                        Ok(()) if self.is_sensitive(i) && !keyring.available() => {
                            return self.fail(
                                format!("sensitive set {} accepted without keyring", name),
                                &store,
                            );
                        }
                        Ok(()) => {}
                        // Expected refusal: no keyring, plaintext not allowed
                        Err(PersistError::Crypto(CryptoError::KeyringUnavailable))
                            if self.is_sensitive(i) && !keyring.available() =>
                        {
                            continue;
                        }
                        Err(e) => return self.fail(format!("set {} failed: {}", name, e), &store),
                    }
                    let stored = if is_null { String::new() } else { value };
                    model.insert(name, (stored, is_null));
                    sets += 1;
                }
                6 => {
                    let i = self.rng.gen_range(0, self.config.num_variables as u64) as usize;
                    let name = variable_name(i);
                    match vars.reset_persisted_variables(&session, Some(&name), true) {
                        Ok(changed) if changed != model.contains_key(&name) => {
                            return self.fail(
                                format!("reset {} reported changed={} against model", name, changed),
                                &store,
                            );
                        }
                        Ok(_) => {}
                        Err(e) => return self.fail(format!("reset {} failed: {}", name, e), &store),
                    }
                    model.remove(&name);
                    resets += 1;
                }
                _ => match vars.flush() {
                    Ok(()) => {
                        acked = model.clone();
                        in_doubt.clear();
                        flushes_ok += 1;
                    }
                    Err(_) => {
                        in_doubt.push(model.clone());
                        flushes_failed += 1;
                    }
                },
            }
        }

        if self.config.simulate_crash {
            store.inner_store().simulate_crash();
        } else {
            // Without a crash the last in-memory state must be flushable once faults stop
            store.set_config(SimulatedFileStoreConfig::no_faults());
            keyring.set_available(true);
            if let Err(e) = vars.flush() {
                return self.fail(format!("final flush failed: {}", e), &store);
            }
            acked = model.clone();
            in_doubt.clear();
        }
        drop(vars);

        // Recovery reads the surviving files without fault injection
        let recovery_store = store.inner_store().clone();
        let on_disk = recovery_store.get_file_data(&config.file_name).unwrap_or_default();
        let on_disk_shadow = recovery_store
            .get_file_data(&format!("{}.backup", config.file_name))
            .unwrap_or_default();
        for secret in &secrets {
            let needle = secret.as_bytes();
            if contains(&on_disk, needle) || contains(&on_disk_shadow, needle) {
                return self.fail(format!("sensitive value {} found in plaintext on disk", secret), &store);
            }
        }

        keyring.set_available(true);
        let recovery_config = PersistConfig {
            load_on_startup: false,
            ..config
        };
        let mut recovered = match PersistedVariables::init(recovery_config, recovery_store, collaborators) {
            Ok(v) => v,
            Err(e) => return self.fail(format!("recovery init failed: {}", e), &store),
        };
        let load_stats = match recovered.load() {
            Ok(stats) => stats,
            Err(e) => return self.fail(format!("recovery failed: {}", e), &store),
        };

        let state: ModelState = recovered
            .snapshot()
            .into_iter()
            .filter(|e| e.durable)
            .map(|e| (e.record.name, (e.record.value, e.record.is_null)))
            .collect();

        let passed = state == acked || in_doubt.iter().any(|s| *s == state);
        let error_message = (!passed).then(|| {
            format!(
                "INVARIANT VIOLATION: recovered {} records matching neither the last \
                 acknowledged flush ({} records) nor any of {} failed flushes after it",
                state.len(),
                acked.len(),
                in_doubt.len()
            )
        });

        PersistDSTResult {
            seed: self.seed,
            total_ops: self.config.num_ops,
            sets,
            resets,
            flushes_ok,
            flushes_failed,
            keyring_outages,
            recovered_records: state.len(),
            recovered_from_shadow: load_stats.recovered_from_shadow,
            store_stats: store.stats(),
            passed,
            error_message,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Run a batch of DST tests across multiple seeds
pub fn run_persist_dst_batch(seeds: std::ops::Range<u64>, config: PersistDSTConfig) -> Vec<PersistDSTResult> {
    seeds
        .map(|seed| {
            let mut harness = PersistDSTHarness::new(seed, config.clone());
            harness.run()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_persist_dst_batch(results: &[PersistDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = total - passed;

    let total_sets: usize = results.iter().map(|r| r.sets).sum();
    let total_ok: usize = results.iter().map(|r| r.flushes_ok).sum();
    let total_failed: usize = results.iter().map(|r| r.flushes_failed).sum();
    let shadow_recoveries = results.iter().filter(|r| r.recovered_from_shadow).count();
    let outages: usize = results.iter().map(|r| r.keyring_outages).sum();

    let mut summary = format!(
        "Persist DST Batch: {}/{} passed ({} failed)\n\
         Sets: {}, Flushes ok: {}, Flushes failed: {}, Shadow recoveries: {}, Keyring outages: {}",
        passed, total, failed, total_sets, total_ok, total_failed, shadow_recoveries, outages
    );

    if failed > 0 {
        summary.push_str("\n\nFailed seeds:");
        for r in results.iter().filter(|r| !r.passed) {
            summary.push_str(&format!(
                "\n  Seed {}: {}",
                r.seed,
                r.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_single_seed() {
        let result = PersistDSTHarness::new(1, PersistDSTConfig::baseline()).run();
        assert!(result.passed, "{:?}", result.error_message);
        assert_eq!(result.flushes_failed, 0);
    }

    #[test]
    fn test_keyring_outages_never_leak_secrets() {
        let config = PersistDSTConfig {
            store_config: SimulatedFileStoreConfig::no_faults(),
            keyring_flip_prob: 0.3,
            sensitive_every: 2,
            ..PersistDSTConfig::default()
        };
        let mut outages = 0;
        for seed in 0..20 {
            let result = PersistDSTHarness::new(seed, config.clone()).run();
            assert!(result.passed, "seed {}: {:?}", seed, result.error_message);
            outages += result.keyring_outages;
        }
        assert!(outages > 0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = PersistDSTHarness::new(9, PersistDSTConfig::chaos()).run();
        let b = PersistDSTHarness::new(9, PersistDSTConfig::chaos()).run();
        assert_eq!(a.sets, b.sets);
        assert_eq!(a.flushes_failed, b.flushes_failed);
        assert_eq!(a.recovered_records, b.recovered_records);
    }
}
