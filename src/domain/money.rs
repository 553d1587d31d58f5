use crate::error::CommerceError;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fractional digits kept for prices, balances and commissions.
pub const MONEY_SCALE: u32 = 2;

/// Largest single [`Amount`] accepted: one trillion.
///
/// Keeps every percentage and commission product far inside `Decimal`'s range.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000);

/// A non-negative monetary value.
///
/// Wraps `rust_decimal::Decimal` so that balances, frozen prices and referral earnings can
/// never be constructed below zero. Arithmetic goes through [`Money::checked_add`] and
/// [`Money::checked_sub`], which refuse to overflow or go negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

/// A strictly positive monetary amount, at most [`MAX_AMOUNT`]: base prices, deposits, debits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, CommerceError> {
        if value >= Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(CommerceError::ValidationError(format!(
                "Money cannot be negative: {value}"
            )))
        }
    }

    /// Rounds to [`MONEY_SCALE`] digits, midpoint away from zero. Negative input clamps to zero.
    pub fn rounded(value: Decimal) -> Self {
        Self(
            value
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
                .max(Decimal::ZERO),
        )
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self.0 >= rhs.0 {
            Some(Self(self.0 - rhs.0))
        } else {
            None
        }
    }
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, CommerceError> {
        if value <= Decimal::ZERO {
            Err(CommerceError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        } else if value > MAX_AMOUNT {
            Err(CommerceError::ValidationError(format!(
                "Amount exceeds maximum of {MAX_AMOUNT}: {value}"
            )))
        } else {
            Ok(Self(value))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Money {
    type Error = CommerceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = CommerceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer discount between 0 and 100 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct DiscountPercent(u8);

impl DiscountPercent {
    pub const NONE: Self = Self(0);

    pub fn new(percent: i64) -> Result<Self, CommerceError> {
        if (0..=100).contains(&percent) {
            Ok(Self(percent as u8))
        } else {
            Err(CommerceError::InvalidDiscount(percent))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// `round(base × (1 − percent/100))`. Cannot overflow for any [`Amount`].
    pub fn apply(&self, base: Amount) -> Money {
        let remaining = Decimal::from(100 - self.0);
        Money::rounded(base.value() * remaining / Decimal::ONE_HUNDRED)
    }
}

impl TryFrom<i64> for DiscountPercent {
    type Error = CommerceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DiscountPercent> for u8 {
    fn from(percent: DiscountPercent) -> Self {
        percent.0
    }
}

impl fmt::Display for DiscountPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
