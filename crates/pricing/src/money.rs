use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// Fixed-point monetary amount in hundredths of the currency unit.
///
/// Whole-unit currencies (CLP, ARS) are still stored in hundredths; their
/// derived prices are simply multiples of 100.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole units of the currency; `None` when the amount does not fit.
    pub const fn checked_from_units(units: i64) -> Option<Self> {
        match units.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Convert a decimal major-unit value, rounding half away from zero to
    /// two decimals.
    pub fn from_major(value: f64) -> Result<Self, PricingError> {
        round_to_i64(value * 100.0)
            .map(Self)
            .ok_or_else(|| PricingError::InvalidAmount(value.to_string()))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn to_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
}

/// Round half away from zero; `None` when the result is not finite or does
/// not fit in an `i64`.
pub(crate) fn round_to_i64(value: f64) -> Option<i64> {
    let rounded = value.round();
    // `i64::MAX as f64` rounds up to 2^63, which is itself out of range.
    let in_range =
        rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64;
    in_range.then(|| rounded as i64)
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Amount::from_cents(4999).to_string(), "49.99");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::from_cents(-150).to_string(), "-1.50");
    }

    #[test]
    fn from_major_rounds_to_cents() {
        assert_eq!(Amount::from_major(49.99).unwrap(), Amount::from_cents(4999));
        assert_eq!(Amount::from_major(0.125).unwrap(), Amount::from_cents(13));
        assert!(Amount::from_major(f64::NAN).is_err());
        assert!(Amount::from_major(1e18).is_err());
    }

    #[test]
    fn whole_units_overflow_is_reported() {
        assert_eq!(Amount::checked_from_units(12), Some(Amount::from_cents(1200)));
        assert_eq!(Amount::checked_from_units(i64::MAX / 10), None);
    }

    #[test]
    fn sums_exactly() {
        let total: Amount = [Amount::from_cents(1), Amount::from_cents(2), Amount::from_cents(4999)]
            .into_iter()
            .sum();
        assert_eq!(total, Amount::from_cents(5002));
    }
}
