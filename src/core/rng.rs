//! Sources of Randomness
//!
//! Every crash draw goes through [`RandomSource`], so a round can be driven by
//! production entropy, a seeded deterministic generator (replays, simulation)
//! or a scripted sequence (tests).

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A uniform source of draws on `[0, 1)`.
pub trait RandomSource: Send {
    /// Next draw.
    fn next_unit(&mut self) -> f64;
}

/// Builds a fresh random source for each new round.
pub type RandomFactory = Arc<dyn Fn() -> Box<dyn RandomSource> + Send + Sync>;

/// Factory producing [`EntropyRng`] sources.
pub fn entropy_factory() -> RandomFactory {
    Arc::new(|| Box::new(EntropyRng::new()) as Box<dyn RandomSource>)
}

/// Factory producing [`FixedRandom`] sources that always return `value`.
pub fn fixed_factory(value: f64) -> RandomFactory {
    Arc::new(move || Box::new(FixedRandom(value)) as Box<dyn RandomSource>)
}

/// Factory producing [`DeterministicRng`] sources, one seed per round.
///
/// Seeds are `base_seed`, `base_seed + 1`, ... in creation order.
pub fn seeded_factory(base_seed: u64) -> RandomFactory {
    let counter = std::sync::atomic::AtomicU64::new(base_seed);
    Arc::new(move || {
        let seed = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Box::new(DeterministicRng::new(seed)) as Box<dyn RandomSource>
    })
}

// =============================================================================
// PRODUCTION
// =============================================================================

/// Non-deterministic source seeded from the operating system.
pub struct EntropyRng {
    inner: StdRng,
}

impl EntropyRng {
    /// Seed a new generator from OS entropy.
    pub fn new() -> Self {
        Self {
            inner: StdRng::from_entropy(),
        }
    }
}

impl Default for EntropyRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for EntropyRng {
    fn next_unit(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }
}

// =============================================================================
// DETERMINISTIC
// =============================================================================

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// Given the same seed, produces the exact same sequence on any platform,
/// which makes a round's crash point reproducible from its seed.
///
/// # Example
///
/// ```
/// use crash_game::core::rng::{DeterministicRng, RandomSource};
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_unit(), b.next_unit());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }
}

impl RandomSource for DeterministicRng {
    /// Top 53 bits scaled into `[0, 1)`.
    #[inline]
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

// =============================================================================
// SCRIPTED
// =============================================================================

/// Always returns the same draw.
///
/// `FixedRandom(1.0)` never crashes a round, `FixedRandom(0.0)` always does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

/// Replays a list of draws, then repeats `fallback` forever.
#[derive(Clone, Debug)]
pub struct ScriptedRandom {
    draws: std::collections::VecDeque<f64>,
    fallback: f64,
}

impl ScriptedRandom {
    /// Create a scripted source.
    pub fn new(draws: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            fallback,
        }
    }

    /// Draws not yet consumed.
    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

impl RandomSource for ScriptedRandom {
    fn next_unit(&mut self) -> f64 {
        self.draws.pop_front().unwrap_or(self.fallback)
    }
}

// =============================================================================
// TESTS
// =============================================================================
