//! Value objects: equality by value, not identity.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To "modify"
/// one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Currency-agnostic fixed-point amount.
///
/// Arithmetic is exact (`rust_decimal`), so `2 × 10.00 + 1 × 5.50` is exactly `25.50`.
/// Serialized as a decimal string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Build a non-negative amount.
    pub fn new(amount: Decimal) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid_argument("amount cannot be negative"));
        }
        Ok(Self(amount))
    }

    /// `units × 10^-scale`, e.g. `Money::from_minor(2550, 2)` is `25.50`.
    pub fn from_minor(units: i64, scale: u32) -> DomainResult<Self> {
        Self::new(Decimal::new(units, scale))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Exact `quantity × self`, or InvalidArgument if it leaves the decimal range.
    pub fn line_total(&self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::invalid_argument("line total overflows"))
    }

    pub fn checked_add(self, rhs: Money) -> DomainResult<Money> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or_else(|| DomainError::invalid_argument("amount overflows"))
    }

    /// Sum of `amounts`, failing on the first overflow.
    pub fn total<I>(amounts: I) -> DomainResult<Money>
    where
        I: IntoIterator<Item = DomainResult<Money>>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.checked_add(amount?))
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s)
            .map_err(|e| DomainError::invalid_argument(format!("malformed amount '{s}': {e}")))?;
        Self::new(amount)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
