use super::account::AccountId;
use super::money::{Amount, Money};
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub Uuid);

impl IntentId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Completed,
    Expired,
}

/// A user's announced intention to deposit funds to a receiving address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositIntent {
    pub id: IntentId,
    pub user_id: AccountId,
    pub currency: String,
    pub address: String,
    /// Hint only; payments are matched against it with a tolerance when present.
    pub expected_amount: Option<Amount>,
    pub status: IntentStatus,
    /// Unique once set.
    pub tx_reference: Option<String>,
    pub credited_amount: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DepositIntent {
    pub fn new(
        user_id: AccountId,
        currency: impl Into<String>,
        address: impl Into<String>,
        expected_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IntentId::generate(),
            user_id,
            currency: currency.into(),
            address: address.into(),
            expected_amount,
            status: IntentStatus::Pending,
            tx_reference: None,
            credited_amount: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Pending
    }

    /// Whether an observed payment of `amount` may settle this intent.
    ///
    /// `tolerance` is relative to the expected amount; intents without a hint accept any amount.
    pub fn accepts(&self, amount: Amount, tolerance: Decimal) -> bool {
        if !self.is_pending() {
            return false;
        }
        match self.expected_amount {
            None => true,
            Some(expected) => {
                let diff = (amount.value() - expected.value()).abs();
                diff <= expected.value() * tolerance
            }
        }
    }

    pub fn complete(
        &mut self,
        tx_reference: impl Into<String>,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), CommerceError> {
        if !self.is_pending() {
            return Err(CommerceError::Conflict(format!(
                "deposit intent {} is {:?}",
                self.id, self.status
            )));
        }
        self.status = IntentStatus::Completed;
        self.tx_reference = Some(tx_reference.into());
        self.credited_amount = Some(amount);
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self) -> bool {
        if self.is_pending() {
            self.status = IntentStatus::Expired;
            true
        } else {
            false
        }
    }
}

/// Event pushed by the external payment watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub address: String,
    pub amount: Amount,
    pub tx_reference: String,
    pub confirmations: u32,
}

/// A confirmed payment that matched no pending intent, held for manual reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedPayment {
    pub tx_reference: String,
    pub address: String,
    pub amount: Amount,
    pub confirmations: u32,
    pub observed_at: DateTime<Utc>,
    pub resolved_by: Option<IntentId>,
}

impl UnmatchedPayment {
    pub fn from_event(event: &PaymentEvent, now: DateTime<Utc>) -> Self {
        Self {
            tx_reference: event.tx_reference.clone(),
            address: event.address.clone(),
            amount: event.amount,
            confirmations: event.confirmations,
            observed_at: now,
            resolved_by: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_by.is_some()
    }
}

/// Result of handing a payment event to the deposit engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// Below the confirmation threshold; nothing recorded.
    BelowConfirmations,
    /// Reference already credited; absorbed without side effects.
    Duplicate { intent_id: IntentId },
    /// No pending intent within tolerance; held for reconciliation.
    Unmatched { tx_reference: String },
    Credited {
        intent_id: IntentId,
        account: AccountId,
        amount: Amount,
        commission: Option<(AccountId, Money)>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_accepts_within_relative_tolerance() {
        let intent = DepositIntent::new(
            AccountId(1),
            "USDT",
            "usdt:1",
            Some(amount(dec!(100))),
            Utc::now(),
        );
        let tolerance = dec!(0.05);
        assert!(intent.accepts(amount(dec!(100)), tolerance));
        assert!(intent.accepts(amount(dec!(95)), tolerance));
        assert!(intent.accepts(amount(dec!(105)), tolerance));
        assert!(!intent.accepts(amount(dec!(94.99)), tolerance));
        assert!(!intent.accepts(amount(dec!(105.01)), tolerance));
    }

    #[test]
    fn test_intent_without_hint_accepts_any_amount() {
        let intent = DepositIntent::new(AccountId(1), "BTC", "btc:1", None, Utc::now());
        assert!(intent.accepts(amount(dec!(0.0001)), dec!(0)));
    }

    #[test]
    fn test_complete_and_expire_only_from_pending() {
        let now = Utc::now();
        let mut intent = DepositIntent::new(AccountId(1), "BTC", "btc:1", None, now);
        intent.complete("tx-1", amount(dec!(10)), now).unwrap();
        assert_eq!(intent.status, IntentStatus::Completed);
        assert_eq!(intent.tx_reference.as_deref(), Some("tx-1"));
        assert!(!intent.accepts(amount(dec!(10)), dec!(1)));
        assert!(!intent.expire());
        assert!(matches!(
            intent.complete("tx-2", amount(dec!(10)), now),
            Err(CommerceError::Conflict(_))
        ));

        let mut stale = DepositIntent::new(AccountId(2), "BTC", "btc:2", None, now);
        assert!(stale.expire());
        assert_eq!(stale.status, IntentStatus::Expired);
    }
}
