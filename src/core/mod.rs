//! Core primitives.
//!
//! Fixed-point multiplier arithmetic and the pluggable sources of randomness
//! every crash draw goes through.

pub mod multiplier;
pub mod rng;

// Re-export core types
pub use multiplier::Multiplier;
pub use rng::{DeterministicRng, EntropyRng, FixedRandom, RandomFactory, RandomSource, ScriptedRandom};
