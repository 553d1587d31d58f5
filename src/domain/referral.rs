use super::money::{Amount, Money};
use crate::error::CommerceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_earnings: Decimal,
    pub label: String,
}

impl TierThreshold {
    pub fn new(min_earnings: Decimal, label: impl Into<String>) -> Self {
        Self {
            min_earnings,
            label: label.into(),
        }
    }
}

/// Ordered referral tiers. The first threshold is always zero so every account has a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TierThreshold>", into = "Vec<TierThreshold>")]
pub struct TierSchedule {
    thresholds: Vec<TierThreshold>,
}

impl TierSchedule {
    pub fn new(thresholds: Vec<TierThreshold>) -> Result<Self, CommerceError> {
        let first = thresholds
            .first()
            .ok_or_else(|| CommerceError::Config("tier table must not be empty".to_string()))?;
        if !first.min_earnings.is_zero() {
            return Err(CommerceError::Config(format!(
                "first tier '{}' must start at 0, got {}",
                first.label, first.min_earnings
            )));
        }
        if let Some(pair) = thresholds
            .windows(2)
            .find(|pair| pair[1].min_earnings <= pair[0].min_earnings)
        {
            return Err(CommerceError::Config(format!(
                "tier thresholds must be strictly ascending: '{}' ({}) follows '{}' ({})",
                pair[1].label, pair[1].min_earnings, pair[0].label, pair[0].min_earnings
            )));
        }
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[TierThreshold] {
        &self.thresholds
    }

    /// Label of the highest tier whose threshold `earnings` reaches.
    pub fn tier_for(&self, earnings: Money) -> &str {
        self.thresholds
            .iter()
            .rev()
            .find(|t| earnings.value() >= t.min_earnings)
            .map(|t| t.label.as_str())
            .unwrap_or_default()
    }

    pub fn entry_tier(&self) -> &str {
        self.tier_for(Money::ZERO)
    }
}

impl Default for TierSchedule {
    fn default() -> Self {
        Self {
            thresholds: vec![
                TierThreshold::new(dec!(0), "Bronze"),
                TierThreshold::new(dec!(100), "Silver"),
                TierThreshold::new(dec!(500), "Gold"),
                TierThreshold::new(dec!(1000), "Platinum"),
                TierThreshold::new(dec!(5000), "Diamond"),
            ],
        }
    }
}

impl TryFrom<Vec<TierThreshold>> for TierSchedule {
    type Error = CommerceError;

    fn try_from(thresholds: Vec<TierThreshold>) -> Result<Self, Self::Error> {
        Self::new(thresholds)
    }
}

impl From<TierSchedule> for Vec<TierThreshold> {
    fn from(schedule: TierSchedule) -> Self {
        schedule.thresholds
    }
}

/// `amount × rate`, rounded to cents.
pub fn commission(amount: Amount, rate: Decimal) -> Result<Money, CommerceError> {
    amount
        .value()
        .checked_mul(rate)
        .map(Money::rounded)
        .ok_or_else(|| {
            CommerceError::ValidationError(format!("commission of {amount} at {rate} overflows"))
        })
}
