//! Numeric and identifier types shared across the consensus core.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height. Genesis is height 0.
pub type Height = u64;

/// A non-negative monetary amount whose arithmetic never wraps: addition and
/// subtraction that would overflow or underflow return an error instead of
/// silently producing a wrong value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Zero is not a valid output value.
    #[must_use]
    pub const fn is_valid_output_value(self) -> bool {
        self.0 != 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(Error::AmountOverflow)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(Error::AmountUnderflow)
    }

    pub fn sum(amounts: impl IntoIterator<Item = Self>) -> Result<Self> {
        amounts
            .into_iter()
            .try_fold(Self::zero(), |acc, a| acc.checked_add(a))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a transaction output: `hash(tx_hash, output_index)` is the
/// key under which the UTXO set stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: crate::hash::Hash,
    pub output_index: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(tx_hash: crate::hash::Hash, output_index: u32) -> Self {
        Self {
            tx_hash,
            output_index,
        }
    }

    /// The UTXO-set key for this reference.
    #[must_use]
    pub fn key(&self) -> crate::hash::Hash {
        crate::hash::Hash::digest_parts(&[self.tx_hash.as_bytes(), &self.output_index.to_le_bytes()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_addition_overflows_to_error() {
        let a = Amount::new(u64::MAX);
        let b = Amount::new(1);
        assert!(a.checked_add(b).is_err());
    }

    #[test]
    fn amount_subtraction_underflows_to_error() {
        let a = Amount::new(0);
        let b = Amount::new(1);
        assert!(a.checked_sub(b).is_err());
    }

    #[test]
    fn zero_is_not_a_valid_output_value() {
        assert!(!Amount::zero().is_valid_output_value());
        assert!(Amount::new(1).is_valid_output_value());
    }

    #[test]
    fn sum_is_order_independent() {
        let values = [Amount::new(10), Amount::new(20), Amount::new(30)];
        assert_eq!(Amount::sum(values).unwrap(), Amount::new(60));
    }

    #[test]
    fn outpoint_key_is_deterministic() {
        let tx = crate::hash::Hash::digest(b"tx");
        let a = OutPoint::new(tx, 0);
        let b = OutPoint::new(tx, 0);
        let c = OutPoint::new(tx, 1);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
