//! Exact quantities and line arithmetic.
//!
//! Money is always an `i64` in the smallest currency unit (cents).

use serde::{Deserialize, Serialize};

/// A quantity in thousandths, so `1.5` hours or `0.25` litres are exact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(i64);

impl Quantity {
    pub const SCALE: i64 = 1_000;

    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    /// Whole units (`Quantity::whole(3)` is `3.000`).
    pub const fn whole(units: i64) -> Self {
        Self(units * Self::SCALE)
    }

    pub const fn milli(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = abs % Self::SCALE as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let digits = format!("{frac:03}");
            write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

/// `quantity × unit_price`, rounded half away from zero to whole cents.
///
/// `None` if the result does not fit in an `i64`.
pub fn line_total(quantity: Quantity, unit_price: i64) -> Option<i64> {
    let product = i128::from(quantity.milli()) * i128::from(unit_price);
    let scale = i128::from(Quantity::SCALE);
    let half = scale / 2;
    let rounded = if product >= 0 {
        (product + half) / scale
    } else {
        (product - half) / scale
    };
    i64::try_from(rounded).ok()
}
