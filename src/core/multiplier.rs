//! Hundredths Fixed-Point Multiplier
//!
//! The round multiplier is stored as an integer count of hundredths so that
//! repeated `+0.01` steps never accumulate floating-point drift.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  raw (u32)   │  display                      │
//! ├──────────────┼───────────────────────────────┤
//! │  100         │  1.00                         │
//! │  101         │  1.01                         │
//! │  600         │  6.00                         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Floats appear only at the boundary (`as_f64`, JSON, `Display`).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hundredths per 1.00x.
pub const HUNDREDTHS_PER_UNIT: u32 = 100;

/// Multiplier value in hundredths (`100` = 1.00x).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u32);

impl Multiplier {
    /// Starting value of every round (1.00x).
    pub const ONE: Multiplier = Multiplier(HUNDREDTHS_PER_UNIT);

    /// Build from a raw hundredths count. Values below 1.00 are clamped up.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        if hundredths < HUNDREDTHS_PER_UNIT {
            Self::ONE
        } else {
            Multiplier(hundredths)
        }
    }

    /// Round a decimal value to the nearest hundredth.
    ///
    /// Returns `None` for non-finite values or anything below 1.00.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 1.0 {
            return None;
        }
        let hundredths = (value * HUNDREDTHS_PER_UNIT as f64).round();
        if hundredths > u32::MAX as f64 {
            return None;
        }
        Some(Multiplier(hundredths as u32))
    }

    /// Raw hundredths count.
    #[inline]
    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// The value one fixed step (0.01) above this one.
    #[inline]
    pub const fn step(self) -> Self {
        Multiplier(self.0.saturating_add(1))
    }

    /// Growth above 1.00x, in whole units (`6.00x` -> `5.0`).
    #[inline]
    pub fn growth(self) -> f64 {
        (self.0 - HUNDREDTHS_PER_UNIT) as f64 / HUNDREDTHS_PER_UNIT as f64
    }

    /// Decimal display form.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS_PER_UNIT as f64
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / HUNDREDTHS_PER_UNIT,
            self.0 % HUNDREDTHS_PER_UNIT
        )
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Multiplier::from_f64(value).ok_or_else(|| {
            serde::de::Error::custom(format!("multiplier out of range: {value}"))
        })
    }
}
