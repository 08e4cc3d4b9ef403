use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign},
};

use serde::{Deserialize, Serialize};

use crate::types::BlockHeight;

/// Smallest currency unit count in one whole coin.
pub const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// Height after which the contract tax is rounded down to a multiple of
/// [`TAX_ROUNDING`].
pub const TAX_HARDFORK_HEIGHT: BlockHeight = 21_000;

pub const TAX_ROUNDING: u128 = 10_000;

/// Amounts are unsigned and saturate instead of wrapping; callers that need
/// to know about underflow use [`Currency::checked_sub`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub const fn coins(n: u128) -> Self {
        Self(n.saturating_mul(COIN_PRECISION))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn mul(self, rhs: Currency) -> Self {
        Self(self.0.saturating_mul(rhs.0))
    }

    pub fn mul64(self, rhs: u64) -> Self {
        Self(self.0.saturating_mul(rhs as u128))
    }

    pub fn mul_float(self, rhs: f64) -> Self {
        Self((self.0 as f64 * rhs) as u128)
    }

    /// Integer division; dividing by zero yields zero.
    pub fn div(self, rhs: Currency) -> Self {
        Self(self.0.checked_div(rhs.0).unwrap_or(0))
    }

    pub fn div64(self, rhs: u64) -> Self {
        Self(self.0.checked_div(rhs as u128).unwrap_or(0))
    }

    pub fn checked_sub(self, rhs: Currency) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_sub(self, rhs: Currency) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Ratio of `self` to `total`, or `None` when `total` is zero.
    pub fn fraction_of(self, total: Currency) -> Option<f64> {
        if total.is_zero() {
            None
        } else {
            Some(self.0 as f64 / total.0 as f64)
        }
    }
}

impl Add for Currency {
    type Output = Currency;

    fn add(self, rhs: Currency) -> Currency {
        Currency(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Currency {
    fn add_assign(&mut self, rhs: Currency) {
        *self = *self + rhs;
    }
}

impl Sum for Currency {
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Self {
        iter.fold(Currency::ZERO, Add::add)
    }
}

impl From<u128> for Currency {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<u64> for Currency {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / COIN_PRECISION;
        let frac = self.0 % COIN_PRECISION;
        if frac == 0 {
            write!(f, "{} C", whole)
        } else {
            let frac = format!("{:024}", frac);
            write!(f, "{}.{} C", whole, frac.trim_end_matches('0'))
        }
    }
}

/// Mandatory contract tax owed on `payout` at `height`.
pub fn tax(height: BlockHeight, payout: Currency) -> Currency {
    let tax = payout.mul64(39).div64(1000);
    if height < TAX_HARDFORK_HEIGHT {
        return tax;
    }
    Currency(tax.0 - tax.0 % TAX_ROUNDING)
}
