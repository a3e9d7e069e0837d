//! Crash Model
//!
//! Maps the current multiplier to the probability that the round crashes on
//! this tick. Consulted once per tick, after the multiplier has advanced.

use crate::core::multiplier::Multiplier;

/// Crash probability at 1.00x.
pub const BASE_CRASH_PROBABILITY: f64 = 0.02;

/// Added crash probability per whole unit of growth above 1.00x.
pub const CRASH_PROBABILITY_SLOPE: f64 = 0.01;

/// Upper bound on the per-tick crash probability.
pub const MAX_CRASH_PROBABILITY: f64 = 0.10;

/// Per-tick crash probability: `min(0.02 + (m - 1.0) * 0.01, 0.10)`.
///
/// Non-decreasing in `multiplier`, capped at [`MAX_CRASH_PROBABILITY`].
#[inline]
pub fn crash_probability(multiplier: Multiplier) -> f64 {
    (BASE_CRASH_PROBABILITY + multiplier.growth() * CRASH_PROBABILITY_SLOPE)
        .min(MAX_CRASH_PROBABILITY)
}

/// Whether `draw` crashes a round currently at `multiplier`.
#[inline]
pub fn should_crash(multiplier: Multiplier, draw: f64) -> bool {
    draw < crash_probability(multiplier)
}
