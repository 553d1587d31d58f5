use super::money::Money;
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Referral code handed out to an account, shared in invite links.
pub fn referral_code_for(id: AccountId) -> String {
    format!("ref-{}", id.0)
}

/// Represents a marketplace account.
///
/// `balance` and `referral_earnings` are materialized views of the ledger: they change only
/// together with an appended [`LedgerEntry`](super::ledger::LedgerEntry) inside one unit of
/// work. `referrer_id` is a plain back-reference resolved by lookup, never an owning link.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    /// Spendable funds.
    pub balance: Money,
    pub referral_code: String,
    /// Account that invited this one, if any.
    pub referrer_id: Option<AccountId>,
    /// Cumulative commission earned from referred deposits.
    pub referral_earnings: Money,
    /// Label derived from `referral_earnings` against the configured tier table.
    pub tier: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        referrer_id: Option<AccountId>,
        tier: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            balance: Money::ZERO,
            referral_code: referral_code_for(id),
            referrer_id,
            referral_earnings: Money::ZERO,
            tier: tier.into(),
            created_at: now,
        }
    }

    /// Adds funds to the spendable balance.
    pub fn credit(&mut self, amount: Money) -> Result<(), CommerceError> {
        self.balance = add_or_reject(self.id, self.balance, amount)?;
        Ok(())
    }

    /// Removes funds if the balance covers them; the balance never goes negative.
    pub fn debit(&mut self, amount: Money) -> Result<(), CommerceError> {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                Ok(())
            }
            None => Err(CommerceError::InsufficientFunds {
                balance: self.balance.value(),
                required: amount.value(),
            }),
        }
    }

    pub fn credit_earnings(&mut self, amount: Money) -> Result<(), CommerceError> {
        self.referral_earnings = add_or_reject(self.id, self.referral_earnings, amount)?;
        Ok(())
    }
}

fn add_or_reject(id: AccountId, current: Money, amount: Money) -> Result<Money, CommerceError> {
    current.checked_add(amount).ok_or_else(|| {
        CommerceError::ValidationError(format!("credit of {amount} overflows account {id}"))
    })
}
