use super::account::AccountId;
use super::money::Money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Purchase,
    DepositCredit,
    ReferralCommission,
    Refund,
}

/// Which materialized field of an account an entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Balance,
    ReferralEarnings,
}

impl EntryReason {
    pub fn bucket(&self) -> Bucket {
        match self {
            EntryReason::ReferralCommission => Bucket::ReferralEarnings,
            _ => Bucket::Balance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::Purchase => "purchase",
            EntryReason::DepositCredit => "deposit_credit",
            EntryReason::ReferralCommission => "referral_commission",
            EntryReason::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a single balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    /// Positive for credits, negative for debits.
    pub delta: Decimal,
    pub reason: EntryReason,
    /// Order id, intent id or payment reference the change belongs to.
    pub reference_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        account_id: AccountId,
        delta: Decimal,
        reason: EntryReason,
        reference_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            delta,
            reason,
            reference_id: reference_id.into(),
            timestamp,
        }
    }

    /// Key under which at most one entry may exist.
    pub fn idempotency_key(&self) -> (AccountId, EntryReason, String) {
        (self.account_id, self.reason, self.reference_id.clone())
    }
}

/// Sums of replayed entries per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Replay {
    pub balance: Decimal,
    pub referral_earnings: Decimal,
}

pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Replay {
    entries
        .into_iter()
        .fold(Replay::default(), |mut acc, entry| {
            match entry.reason.bucket() {
                Bucket::Balance => acc.balance += entry.delta,
                Bucket::ReferralEarnings => acc.referral_earnings += entry.delta,
            }
            acc
        })
}

/// Outcome of comparing an account's materialized fields with its replayed entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub materialized_balance: Money,
    pub replayed_balance: Decimal,
    pub materialized_earnings: Money,
    pub replayed_earnings: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.materialized_balance.value() == self.replayed_balance
            && self.materialized_earnings.value() == self.replayed_earnings
    }
}
