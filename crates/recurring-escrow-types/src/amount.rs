//! Token amounts with 18-decimal precision
//!
//! Amounts are unsigned base units held in a `u128`, wide enough for any
//! realistic token supply multiplied by any realistic collection window. All
//! arithmetic that can leave that range is checked and fails closed.

use crate::{EscrowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard token precision (18 decimals)
pub const TOKEN_DECIMALS: u32 = 18;

/// Base units per whole token
pub const TOKEN_UNIT: u128 = 1_000_000_000_000_000_000;

/// A token amount in base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tokens(pub u128);

impl Tokens {
    /// Zero tokens
    pub const ZERO: Self = Self(0);

    /// Create from base units
    pub const fn new(base_units: u128) -> Self {
        Self(base_units)
    }

    /// Create from a whole-token count (`n * 10^18`)
    pub const fn from_whole(n: u64) -> Self {
        // u64::MAX * 10^18 < u128::MAX
        Self(n as u128 * TOKEN_UNIT)
    }

    /// Raw base units
    pub const fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(EscrowError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(EscrowError::AmountUnderflow)
    }

    /// Checked multiplication by a scalar (tokens-per-second times seconds)
    pub fn checked_mul(self, factor: u64) -> Result<Self> {
        self.0
            .checked_mul(factor as u128)
            .map(Self)
            .ok_or(EscrowError::AmountOverflow)
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Checked sum of an iterator of amounts
    pub fn checked_sum<I: IntoIterator<Item = Tokens>>(iter: I) -> Result<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl From<u128> for Tokens {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for Tokens {
    /// Exact decimal rendering: `3700 GRT`, `0.5 GRT`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / TOKEN_UNIT;
        let frac = self.0 % TOKEN_UNIT;
        if frac == 0 {
            write!(f, "{} GRT", whole)
        } else {
            let digits = format!("{:018}", frac);
            write!(f, "{}.{} GRT", whole, digits.trim_end_matches('0'))
        }
    }
}
