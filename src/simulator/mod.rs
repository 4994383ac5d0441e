//! Deterministic simulation support
//!
//! Seeded randomness shared by the fault-injecting file store and the DST
//! harness. Same seed, same run.

mod rng;

pub use rng::DeterministicRng;
