use crate::domain::account::{Account, AccountId};
use crate::domain::ledger::{self, Bucket, EntryReason, LedgerEntry, Reconciliation};
use crate::domain::money::{Amount, Money};
use crate::domain::ports::{SharedClock, SharedStore, UnitOfWork};
use crate::domain::referral::TierSchedule;
use crate::error::{CommerceError, Result};
use tracing::{debug, info};

/// Owns account balances and referral earnings.
///
/// Every change appends a [`LedgerEntry`] and updates the materialized field in the same unit
/// of work, so `balance` can always be reproduced by replaying entries.
#[derive(Clone)]
pub struct BalanceLedger {
    store: SharedStore,
    clock: SharedClock,
    tiers: TierSchedule,
}

impl BalanceLedger {
    pub fn new(store: SharedStore, clock: SharedClock, tiers: TierSchedule) -> Self {
        Self {
            store,
            clock,
            tiers,
        }
    }

    pub fn tiers(&self) -> &TierSchedule {
        &self.tiers
    }

    /// Registers a new account, optionally referred by the owner of `referrer_code`.
    pub async fn open_account(
        &self,
        id: AccountId,
        referrer_code: Option<&str>,
    ) -> Result<Account> {
        let referrer = match referrer_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let referrer = self
                    .store
                    .account_by_referral_code(code)
                    .await?
                    .ok_or_else(|| CommerceError::NotFound(format!("referral code {code}")))?;
                if referrer.id == id {
                    return Err(CommerceError::ValidationError(format!(
                        "account {id} cannot refer itself"
                    )));
                }
                Some(referrer.id)
            }
            None => None,
        };

        let mut uow = self.store.begin();
        if uow.lock_account(id).await?.is_some() {
            return Err(CommerceError::Conflict(format!(
                "account {id} already exists"
            )));
        }
        let account = Account::new(id, referrer, self.tiers.entry_tier(), self.clock.now());
        uow.put_account(account.clone());
        uow.commit().await?;

        info!(account = %id, referrer = ?referrer, "Account opened");
        Ok(account)
    }

    /// Credits `amount` in its own unit of work. Returns `false` if `reference_id` was already
    /// applied for `reason`.
    pub async fn credit(
        &self,
        account: AccountId,
        amount: Amount,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        let mut uow = self.store.begin();
        let applied = self
            .credit_within(uow.as_mut(), account, amount.into(), reason, reference_id)
            .await?;
        match uow.commit().await {
            Ok(()) => Ok(applied),
            Err(CommerceError::DuplicateEvent(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Debits `amount` in its own unit of work.
    pub async fn debit(
        &self,
        account: AccountId,
        amount: Amount,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<()> {
        let mut uow = self.store.begin();
        self.debit_within(uow.as_mut(), account, amount.into(), reason, reference_id)
            .await?;
        uow.commit().await
    }

    /// Stages an idempotent credit inside the caller's unit of work.
    ///
    /// `ReferralCommission` credits move `referral_earnings` and recompute the tier; every
    /// other reason moves `balance`.
    pub async fn credit_within(
        &self,
        uow: &mut dyn UnitOfWork,
        account_id: AccountId,
        amount: Money,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        let mut account = uow
            .lock_account(account_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("account {account_id}")))?;

        if uow.entry_exists(account_id, reason, reference_id).await? {
            debug!(account = %account_id, %reason, reference_id, "Credit already applied");
            return Ok(false);
        }

        match reason.bucket() {
            Bucket::Balance => account.credit(amount)?,
            Bucket::ReferralEarnings => {
                account.credit_earnings(amount)?;
                let tier = self.tiers.tier_for(account.referral_earnings);
                if tier != account.tier {
                    info!(account = %account_id, from = %account.tier, to = tier, "Referral tier changed");
                    account.tier = tier.to_string();
                }
            }
        }

        uow.append_entry(LedgerEntry::new(
            account_id,
            amount.value(),
            reason,
            reference_id,
            self.clock.now(),
        ));
        uow.put_account(account);
        debug!(account = %account_id, %amount, %reason, reference_id, "Credit staged");
        Ok(true)
    }

    /// Stages a debit inside the caller's unit of work. Fails with `InsufficientFunds` without
    /// staging anything if the balance does not cover `amount`.
    pub async fn debit_within(
        &self,
        uow: &mut dyn UnitOfWork,
        account_id: AccountId,
        amount: Money,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<()> {
        let mut account = uow
            .lock_account(account_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("account {account_id}")))?;

        account.debit(amount)?;

        uow.append_entry(LedgerEntry::new(
            account_id,
            -amount.value(),
            reason,
            reference_id,
            self.clock.now(),
        ));
        uow.put_account(account);
        debug!(account = %account_id, %amount, %reason, reference_id, "Debit staged");
        Ok(())
    }

    pub async fn account(&self, id: AccountId) -> Result<Account> {
        self.store
            .account(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("account {id}")))
    }

    /// Committed balance.
    pub async fn balance_of(&self, id: AccountId) -> Result<Money> {
        Ok(self.account(id).await?.balance)
    }

    /// Entries of `id` in the order they were written.
    pub async fn statement(&self, id: AccountId) -> Result<Vec<LedgerEntry>> {
        self.account(id).await?;
        let mut entries = self.store.ledger_entries(id).await?;
        entries.sort_by_key(|e| (e.timestamp, e.id));
        Ok(entries)
    }

    /// Replays the entries of `id` and compares them with the materialized fields.
    pub async fn reconcile(&self, id: AccountId) -> Result<Reconciliation> {
        let account = self.account(id).await?;
        let entries = self.store.ledger_entries(id).await?;
        let replayed = ledger::replay(&entries);
        Ok(Reconciliation {
            account_id: id,
            materialized_balance: account.balance,
            replayed_balance: replayed.balance,
            materialized_earnings: account.referral_earnings,
            replayed_earnings: replayed.referral_earnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::default()),
            TierSchedule::default(),
        )
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_open_account_with_referrer() {
        let ledger = ledger();
        ledger.open_account(AccountId(1), None).await.unwrap();
        let referred = ledger.open_account(AccountId(2), Some("ref-1")).await.unwrap();
        assert_eq!(referred.referrer_id, Some(AccountId(1)));
        assert_eq!(referred.tier, "Bronze");

        assert!(matches!(
            ledger.open_account(AccountId(2), None).await,
            Err(CommerceError::Conflict(_))
        ));
        assert!(matches!(
            ledger.open_account(AccountId(3), Some("ref-99")).await,
            Err(CommerceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_is_idempotent_per_reference() {
        let ledger = ledger();
        ledger.open_account(AccountId(1), None).await.unwrap();

        assert!(
            ledger
                .credit(AccountId(1), amount(dec!(50)), EntryReason::DepositCredit, "d-1")
                .await
                .unwrap()
        );
        assert!(
            !ledger
                .credit(AccountId(1), amount(dec!(50)), EntryReason::DepositCredit, "d-1")
                .await
                .unwrap()
        );
        assert_eq!(ledger.balance_of(AccountId(1)).await.unwrap().value(), dec!(50));
        assert_eq!(ledger.statement(AccountId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let ledger = ledger();
        ledger.open_account(AccountId(1), None).await.unwrap();
        ledger
            .credit(AccountId(1), amount(dec!(10)), EntryReason::DepositCredit, "d-1")
            .await
            .unwrap();

        let result = ledger
            .debit(AccountId(1), amount(dec!(10.01)), EntryReason::Purchase, "o-1")
            .await;
        assert!(matches!(result, Err(CommerceError::InsufficientFunds { .. })));
        assert_eq!(ledger.balance_of(AccountId(1)).await.unwrap().value(), dec!(10));

        ledger
            .debit(AccountId(1), amount(dec!(10)), EntryReason::Purchase, "o-2")
            .await
            .unwrap();
        assert!(ledger.balance_of(AccountId(1)).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_commission_moves_earnings_and_tier() {
        let ledger = ledger();
        ledger.open_account(AccountId(1), None).await.unwrap();
        ledger
            .credit(
                AccountId(1),
                amount(dec!(120)),
                EntryReason::ReferralCommission,
                "i-1",
            )
            .await
            .unwrap();

        let account = ledger.account(AccountId(1)).await.unwrap();
        assert_eq!(account.referral_earnings.value(), dec!(120));
        assert!(account.balance.is_zero());
        assert_eq!(account.tier, "Silver");
    }

    #[tokio::test]
    async fn test_reconcile_matches_replay() {
        let ledger = ledger();
        ledger.open_account(AccountId(1), None).await.unwrap();
        ledger
            .credit(AccountId(1), amount(dec!(85)), EntryReason::DepositCredit, "d-1")
            .await
            .unwrap();
        ledger
            .debit(AccountId(1), amount(dec!(80)), EntryReason::Purchase, "o-1")
            .await
            .unwrap();
        ledger
            .credit(AccountId(1), amount(dec!(3)), EntryReason::ReferralCommission, "d-9")
            .await
            .unwrap();

        let report = ledger.reconcile(AccountId(1)).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.replayed_balance, dec!(5));
        assert_eq!(report.replayed_earnings, dec!(3));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let ledger = ledger();
        assert!(matches!(
            ledger.balance_of(AccountId(42)).await,
            Err(CommerceError::NotFound(_))
        ));
        assert!(matches!(
            ledger
                .credit(AccountId(42), amount(dec!(1)), EntryReason::Refund, "o-1")
                .await,
            Err(CommerceError::NotFound(_))
        ));
    }
}
