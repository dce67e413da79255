//! Fixed-point payout multiplier with two decimal places.
//!
//! Stored as hundredths so that `1.00 + 0.01 * n` is exact and comparisons
//! against the crash point never suffer float drift. Serialized as a JSON
//! number (`1.23`) for the wire.

use core::fmt;

use serde::{Serialize, Serializer};

/// A multiplier such as `2.37x`, in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u32);

impl Multiplier {
    /// `1.00x`, the value at which every round starts.
    pub const ONE: Self = Self(100);

    /// `0.01x`, the default per-tick increment.
    pub const CENT: Self = Self(1);

    #[inline]
    #[must_use]
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    #[inline]
    #[must_use]
    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// Rounds a float to the nearest hundredth (`2.345 -> 2.35`), clamped at zero.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self((value * 100.0).round().clamp(0.0, f64::from(u32::MAX)) as u32)
    }

    #[inline]
    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// `self + step`, capped at `limit`.
    #[must_use]
    pub fn step_towards(self, step: Self, limit: Self) -> Self {
        Self(self.0.saturating_add(step.0)).min(limit)
    }

    /// Scales a wager by this multiplier.
    #[must_use]
    pub fn apply(self, amount: f64) -> f64 {
        amount * self.as_f64()
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Serializes `None` as `0`, matching what existing clients expect for a
/// participant that has not cashed out.
pub(crate) fn serialize_or_zero<S: Serializer>(
    value: &Option<Multiplier>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(m) => m.serialize(serializer),
        None => serializer.serialize_u8(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_exact_and_capped() {
        let mut m = Multiplier::ONE;
        for _ in 0..37 {
            m = m.step_towards(Multiplier::CENT, Multiplier::from_hundredths(1_000));
        }
        assert_eq!(m, Multiplier::from_hundredths(137));
        assert_eq!(m.to_string(), "1.37x");

        let capped = m.step_towards(Multiplier::from_hundredths(50), Multiplier::from_hundredths(150));
        assert_eq!(capped, Multiplier::from_hundredths(150));
    }

    #[test]
    fn float_conversion_rounds_to_hundredths() {
        assert_eq!(Multiplier::from_f64(2.345_1), Multiplier::from_hundredths(235));
        assert_eq!(Multiplier::from_f64(-3.0), Multiplier::from_hundredths(0));
        assert_eq!(Multiplier::from_hundredths(1_099).as_f64(), 10.99);
    }

    #[test]
    fn serializes_as_json_number() {
        let json = serde_json::to_string(&Multiplier::from_hundredths(205)).unwrap();
        assert_eq!(json, "2.05");
        assert_eq!(Multiplier::from_hundredths(300).apply(10.0), 30.0);
    }
}
