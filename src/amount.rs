use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
///
/// Used both for money (order values, discounts) and for percentage rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    /// Largest magnitude accepted from external input (one trillion).
    pub const MAX: Amount = Amount(1_000_000_000_000 * Self::SCALE);

    /// Lossy conversion: non-finite input becomes zero and values beyond the
    /// `i64` range saturate. Use [`Amount::try_from_float`] for external input.
    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i64)
    }

    /// Convert external input, rejecting non-finite values and magnitudes
    /// above [`Amount::MAX`].
    pub fn try_from_float(value: f64) -> Result<Self, ParseAmountError> {
        if !value.is_finite() || value.abs() > Self::MAX.to_float() {
            return Err(ParseAmountError(value.to_string()));
        }
        Ok(Amount::from_float(value))
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn from_whole(value: i64) -> Self {
        Amount(value * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn to_float(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `self * rate / 100`, rounded half away from zero.
    pub fn percent(self, rate: Amount) -> Amount {
        let product = self.0 as i128 * rate.0 as i128;
        let divisor = 100 * Self::SCALE as i128;
        let half = divisor / 2;
        let rounded = if product >= 0 {
            (product + half) / divisor
        } else {
            (product - half) / divisor
        };
        Amount(rounded as i64)
    }

    /// Divide evenly by `count`, rounded toward zero. Zero for an empty count.
    pub fn average(self, count: u64) -> Amount {
        if count == 0 {
            return Amount::ZERO;
        }
        Amount((self.0 as i128 / count as i128) as i64)
    }

    pub fn abs_diff(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0).saturating_abs())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

/// Error returned when parsing an [`Amount`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}'")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: f64 = trimmed
            .parse()
            .map_err(|_| ParseAmountError(trimmed.to_string()))?;
        Amount::try_from_float(value).map_err(|_| ParseAmountError(trimmed.to_string()))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::try_from_float(value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_float())
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}
