use super::ledger::BalanceLedger;
use crate::config::DepositConfig;
use crate::domain::account::AccountId;
use crate::domain::deposit::{
    DepositIntent, IntentId, IntentStatus, PaymentEvent, PaymentOutcome, UnmatchedPayment,
};
use crate::domain::ledger::EntryReason;
use crate::domain::money::{Amount, Money};
use crate::domain::ports::{AddressBook, SharedClock, SharedStore, UnitOfWork};
use crate::domain::referral;
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Matches external payments to pending deposit intents and pays referral commission.
#[derive(Clone)]
pub struct DepositEngine {
    store: SharedStore,
    clock: SharedClock,
    addresses: Arc<dyn AddressBook>,
    ledger: BalanceLedger,
    config: DepositConfig,
    commission_rate: Decimal,
}

impl DepositEngine {
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        addresses: Arc<dyn AddressBook>,
        ledger: BalanceLedger,
        config: DepositConfig,
        commission_rate: Decimal,
    ) -> Self {
        Self {
            store,
            clock,
            addresses,
            ledger,
            config,
            commission_rate,
        }
    }

    /// Opens a pending intent at the user's receiving address for `currency`.
    ///
    /// A still-pending intent at the same address is reused, taking the new amount hint if
    /// one is given.
    pub async fn create_deposit_intent(
        &self,
        user: AccountId,
        currency: &str,
        amount_hint: Option<Amount>,
    ) -> Result<DepositIntent> {
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(CommerceError::ValidationError(
                "currency must not be empty".to_string(),
            ));
        }
        if self.store.account(user).await?.is_none() {
            return Err(CommerceError::NotFound(format!("account {user}")));
        }
        let address = self.addresses.address_for(user, &currency);

        let pending = self
            .store
            .intents_at_address(&address)
            .await?
            .into_iter()
            .filter(|i| i.is_pending() && i.user_id == user)
            .min_by_key(|i| i.id);

        if let Some(existing) = pending {
            let mut uow = self.store.begin();
            match uow.lock_intent(existing.id).await? {
                Some(mut intent) if intent.is_pending() => {
                    if amount_hint.is_some() && amount_hint != intent.expected_amount {
                        intent.expected_amount = amount_hint;
                        uow.put_intent(intent.clone());
                        uow.commit().await?;
                    }
                    debug!(intent = %intent.id, %address, "Reusing pending deposit intent");
                    return Ok(intent);
                }
                _ => {}
            }
        }

        let intent = DepositIntent::new(user, currency, address, amount_hint, self.clock.now());
        let mut uow = self.store.begin();
        uow.lock_intent(intent.id).await?;
        uow.put_intent(intent.clone());
        uow.commit().await?;
        info!(intent = %intent.id, account = %user, address = %intent.address, "Deposit intent created");
        Ok(intent)
    }

    /// Entry point for the external payment watcher.
    ///
    /// Candidate intents are looked up before any lock is taken; locks are only held for the
    /// final settlement. Replays of a credited reference come back as `Duplicate` and payments
    /// with no pending intent within tolerance are stored for reconciliation and come back as
    /// `Unmatched`.
    pub async fn on_external_payment_observed(
        &self,
        event: PaymentEvent,
    ) -> Result<PaymentOutcome> {
        if event.confirmations < self.config.min_confirmations {
            debug!(
                tx_reference = %event.tx_reference,
                confirmations = event.confirmations,
                required = self.config.min_confirmations,
                "Ignoring unconfirmed payment"
            );
            return Ok(PaymentOutcome::BelowConfirmations);
        }
        if event.tx_reference.trim().is_empty() {
            return Err(CommerceError::ValidationError(
                "payment event without tx reference".to_string(),
            ));
        }

        let mut candidates: Vec<IntentId> = self
            .store
            .intents_at_address(&event.address)
            .await?
            .into_iter()
            .filter(|i| i.accepts(event.amount, self.config.amount_tolerance))
            .map(|i| i.id)
            .collect();
        candidates.sort();

        let now = self.clock.now();
        let mut uow = self.store.begin();
        if let Some(existing) = uow.lock_payment_reference(&event.tx_reference).await? {
            return Ok(self.duplicate(&event.tx_reference, existing.id));
        }

        let mut matched = None;
        for id in candidates {
            match uow.lock_intent(id).await? {
                Some(intent)
                    if intent.address == event.address
                        && intent.accepts(event.amount, self.config.amount_tolerance) =>
                {
                    matched = Some(intent);
                    break;
                }
                _ => continue,
            }
        }

        let Some(intent) = matched else {
            return self.hold_unmatched(uow, &event, now).await;
        };

        // The same reference may have been held earlier, before its intent existed.
        let held = uow.unmatched_payment(&event.tx_reference).await?;
        let intent_id = intent.id;
        let outcome = self
            .settle_within(uow.as_mut(), intent, event.amount, &event.tx_reference, now)
            .await?;
        mark_resolved(uow.as_mut(), held, intent_id);
        self.commit_settlement(uow, &event.tx_reference, outcome)
            .await
    }

    /// Admin completion for rails without an automated watcher.
    pub async fn complete_intent_manually(
        &self,
        intent_id: IntentId,
        amount: Amount,
        tx_reference: &str,
    ) -> Result<PaymentOutcome> {
        let now = self.clock.now();
        let mut uow = self.store.begin();
        if let Some(existing) = uow.lock_payment_reference(tx_reference).await? {
            return Ok(self.duplicate(tx_reference, existing.id));
        }
        let held = uow.unmatched_payment(tx_reference).await?;
        let intent = self.lock_pending_intent(uow.as_mut(), intent_id).await?;

        let outcome = self
            .settle_within(uow.as_mut(), intent, amount, tx_reference, now)
            .await?;
        mark_resolved(uow.as_mut(), held, intent_id);
        info!(intent = %intent_id, tx_reference, "Deposit intent completed manually");
        self.commit_settlement(uow, tx_reference, outcome).await
    }

    /// Credits a held payment to the given intent.
    pub async fn resolve_unmatched(
        &self,
        tx_reference: &str,
        intent_id: IntentId,
    ) -> Result<PaymentOutcome> {
        let now = self.clock.now();
        let mut uow = self.store.begin();
        if let Some(existing) = uow.lock_payment_reference(tx_reference).await? {
            return Ok(self.duplicate(tx_reference, existing.id));
        }
        let mut held = uow.unmatched_payment(tx_reference).await?.ok_or_else(|| {
            CommerceError::NotFound(format!("unmatched payment {tx_reference}"))
        })?;
        let intent = self.lock_pending_intent(uow.as_mut(), intent_id).await?;

        let outcome = self
            .settle_within(uow.as_mut(), intent, held.amount, tx_reference, now)
            .await?;
        held.resolved_by = Some(intent_id);
        uow.put_unmatched(held);
        info!(intent = %intent_id, tx_reference, "Unmatched payment resolved");
        self.commit_settlement(uow, tx_reference, outcome).await
    }

    /// Moves pending intents older than the configured TTL to `Expired`.
    pub async fn expire_stale_intents(&self) -> Result<usize> {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(self.config.intent_ttl())
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        else {
            return Ok(0);
        };

        let stale: Vec<IntentId> = self
            .store
            .intents()
            .await?
            .into_iter()
            .filter(|i| i.is_pending() && i.created_at < cutoff)
            .map(|i| i.id)
            .collect();

        let mut expired = 0;
        for id in stale {
            let mut uow = self.store.begin();
            let Some(mut intent) = uow.lock_intent(id).await? else {
                continue;
            };
            if intent.created_at < cutoff && intent.expire() {
                uow.put_intent(intent);
                uow.commit().await?;
                expired += 1;
                debug!(intent = %id, "Deposit intent expired");
            }
        }
        if expired > 0 {
            info!(expired, "Stale deposit intents expired");
        }
        Ok(expired)
    }

    pub async fn intent(&self, id: IntentId) -> Result<DepositIntent> {
        self.store
            .intent(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("deposit intent {id}")))
    }

    /// Payments still waiting for manual reconciliation.
    pub async fn unmatched_payments(&self) -> Result<Vec<UnmatchedPayment>> {
        Ok(self
            .store
            .unmatched_payments()
            .await?
            .into_iter()
            .filter(|p| !p.is_resolved())
            .collect())
    }

    async fn lock_pending_intent(
        &self,
        uow: &mut dyn UnitOfWork,
        intent_id: IntentId,
    ) -> Result<DepositIntent> {
        let intent = uow
            .lock_intent(intent_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("deposit intent {intent_id}")))?;
        if intent.status != IntentStatus::Pending {
            return Err(CommerceError::Conflict(format!(
                "deposit intent {intent_id} is {:?}",
                intent.status
            )));
        }
        Ok(intent)
    }

    /// Completes `intent`, credits the depositor and pays the referrer, all staged in `uow`.
    ///
    /// Accounts are locked in ascending id order.
    async fn settle_within(
        &self,
        uow: &mut dyn UnitOfWork,
        mut intent: DepositIntent,
        amount: Amount,
        tx_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        let depositor = self
            .store
            .account(intent.user_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("account {}", intent.user_id)))?;

        let mut to_lock: Vec<AccountId> = std::iter::once(depositor.id)
            .chain(depositor.referrer_id)
            .collect();
        to_lock.sort();
        to_lock.dedup();
        for id in to_lock {
            uow.lock_account(id).await?;
        }

        intent.complete(tx_reference, amount, now)?;
        let reference_id = intent.id.to_string();
        let intent_id = intent.id;
        uow.put_intent(intent);

        self.ledger
            .credit_within(
                uow,
                depositor.id,
                amount.into(),
                EntryReason::DepositCredit,
                &reference_id,
            )
            .await?;

        let mut commission = None;
        if let Some(referrer) = depositor.referrer_id {
            let payout: Money = referral::commission(amount, self.commission_rate)?;
            if !payout.is_zero() {
                self.ledger
                    .credit_within(
                        uow,
                        referrer,
                        payout,
                        EntryReason::ReferralCommission,
                        &reference_id,
                    )
                    .await?;
                commission = Some((referrer, payout));
            }
        }

        Ok(PaymentOutcome::Credited {
            intent_id,
            account: depositor.id,
            amount,
            commission,
        })
    }

    async fn commit_settlement(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        tx_reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<PaymentOutcome> {
        match uow.commit().await {
            Ok(()) => {
                if let PaymentOutcome::Credited {
                    intent_id,
                    account,
                    amount,
                    commission,
                } = &outcome
                {
                    info!(
                        intent = %intent_id,
                        account = %account,
                        %amount,
                        tx_reference,
                        commission = ?commission,
                        "Deposit credited"
                    );
                }
                Ok(outcome)
            }
            Err(CommerceError::DuplicateEvent(_)) => {
                match self.store.intent_by_reference(tx_reference).await? {
                    Some(existing) => Ok(self.duplicate(tx_reference, existing.id)),
                    None => Err(CommerceError::DuplicateEvent(tx_reference.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn hold_unmatched(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        if uow.unmatched_payment(&event.tx_reference).await?.is_none() {
            uow.put_unmatched(UnmatchedPayment::from_event(event, now));
            uow.commit().await?;
        }
        warn!(
            tx_reference = %event.tx_reference,
            address = %event.address,
            amount = %event.amount,
            "Payment matched no pending intent, held for reconciliation"
        );
        Ok(PaymentOutcome::Unmatched {
            tx_reference: event.tx_reference.clone(),
        })
    }

    fn duplicate(&self, tx_reference: &str, intent_id: IntentId) -> PaymentOutcome {
        info!(tx_reference, intent = %intent_id, "Duplicate payment event absorbed");
        PaymentOutcome::Duplicate { intent_id }
    }
}

fn mark_resolved(uow: &mut dyn UnitOfWork, held: Option<UnmatchedPayment>, intent_id: IntentId) {
    if let Some(mut held) = held.filter(|h| !h.is_resolved()) {
        held.resolved_by = Some(intent_id);
        uow.put_unmatched(held);
    }
}
