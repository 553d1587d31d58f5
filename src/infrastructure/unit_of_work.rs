use super::locks::{LockTable, RowGuard, RowKey};
use crate::domain::account::{Account, AccountId};
use crate::domain::deposit::{DepositIntent, IntentId, UnmatchedPayment};
use crate::domain::ledger::{EntryReason, LedgerEntry};
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::{Store, StoreReader, UnitOfWork};
use crate::domain::product::{Product, ProductId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes staged by a unit of work, applied by a [`Backend`] in one step.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub products: BTreeMap<ProductId, Product>,
    pub accounts: BTreeMap<AccountId, Account>,
    pub intents: BTreeMap<IntentId, DepositIntent>,
    pub entries: Vec<LedgerEntry>,
    pub orders: Vec<Order>,
    pub unmatched: BTreeMap<String, UnmatchedPayment>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
            && self.accounts.is_empty()
            && self.intents.is_empty()
            && self.entries.is_empty()
            && self.orders.is_empty()
            && self.unmatched.is_empty()
    }
}

/// Physical storage under a [`TransactionalStore`].
///
/// `apply` must be all-or-nothing and must reject, with `DuplicateEvent`, a change set that
/// reuses a payment reference held by another intent or a ledger idempotency key that is
/// already stored.
#[async_trait]
pub trait Backend: StoreReader + 'static {
    async fn apply(&self, changes: ChangeSet) -> Result<()>;
}

/// Row-locking unit-of-work layer over any [`Backend`].
pub struct TransactionalStore<B> {
    backend: Arc<B>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl<B> Clone for TransactionalStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            locks: self.locks.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<B: Backend> TransactionalStore<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            locks: Arc::new(LockTable::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: Backend> StoreReader for TransactionalStore<B> {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        self.backend.product(id).await
    }

    async fn products(&self) -> Result<Vec<Product>> {
        self.backend.products().await
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.backend.account(id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        self.backend.accounts().await
    }

    async fn account_by_referral_code(&self, code: &str) -> Result<Option<Account>> {
        self.backend.account_by_referral_code(code).await
    }

    async fn intent(&self, id: IntentId) -> Result<Option<DepositIntent>> {
        self.backend.intent(id).await
    }

    async fn intents(&self) -> Result<Vec<DepositIntent>> {
        self.backend.intents().await
    }

    async fn intents_at_address(&self, address: &str) -> Result<Vec<DepositIntent>> {
        self.backend.intents_at_address(address).await
    }

    async fn intent_by_reference(&self, tx_reference: &str) -> Result<Option<DepositIntent>> {
        self.backend.intent_by_reference(tx_reference).await
    }

    async fn ledger_entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        self.backend.ledger_entries(account).await
    }

    async fn entry_exists(
        &self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        self.backend.entry_exists(account, reason, reference_id).await
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.backend.order(id).await
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.backend.orders().await
    }

    async fn unmatched_payment(&self, tx_reference: &str) -> Result<Option<UnmatchedPayment>> {
        self.backend.unmatched_payment(tx_reference).await
    }

    async fn unmatched_payments(&self) -> Result<Vec<UnmatchedPayment>> {
        self.backend.unmatched_payments().await
    }
}

impl<B: Backend> Store for TransactionalStore<B> {
    fn begin(&self) -> Box<dyn UnitOfWork> {
        Box::new(StagedUnitOfWork {
            backend: self.backend.clone(),
            locks: self.locks.clone(),
            lock_timeout: self.lock_timeout,
            held: BTreeMap::new(),
            changes: ChangeSet::default(),
        })
    }
}

/// Unit of work that stages writes in memory and holds row guards until commit or drop.
pub struct StagedUnitOfWork<B> {
    backend: Arc<B>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
    held: BTreeMap<RowKey, RowGuard>,
    changes: ChangeSet,
}

impl<B: Backend> StagedUnitOfWork<B> {
    async fn acquire(&mut self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        debug_assert!(
            self.held.keys().next_back().is_none_or(|last| *last < key),
            "lock order violated: {key:?} requested after {:?}",
            self.held.keys().next_back()
        );
        let guard = self.locks.acquire(&key, self.lock_timeout).await?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn holds(&self, key: &RowKey) -> bool {
        self.held.contains_key(key)
    }
}

#[async_trait]
impl<B: Backend> UnitOfWork for StagedUnitOfWork<B> {
    async fn lock_payment_reference(
        &mut self,
        tx_reference: &str,
    ) -> Result<Option<DepositIntent>> {
        self.acquire(RowKey::PaymentReference(tx_reference.to_string()))
            .await?;
        if let Some(staged) = self
            .changes
            .intents
            .values()
            .find(|i| i.tx_reference.as_deref() == Some(tx_reference))
        {
            return Ok(Some(staged.clone()));
        }
        self.backend.intent_by_reference(tx_reference).await
    }

    async fn lock_intent(&mut self, id: IntentId) -> Result<Option<DepositIntent>> {
        self.acquire(RowKey::Intent(id)).await?;
        match self.changes.intents.get(&id) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.backend.intent(id).await,
        }
    }

    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        self.acquire(RowKey::Product(id)).await?;
        match self.changes.products.get(&id) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.backend.product(id).await,
        }
    }

    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        self.acquire(RowKey::Account(id)).await?;
        match self.changes.accounts.get(&id) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.backend.account(id).await,
        }
    }

    async fn entry_exists(
        &mut self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        let staged = self.changes.entries.iter().any(|e| {
            e.account_id == account && e.reason == reason && e.reference_id == reference_id
        });
        if staged {
            return Ok(true);
        }
        self.backend
            .entry_exists(account, reason, reference_id)
            .await
    }

    async fn unmatched_payment(&mut self, tx_reference: &str) -> Result<Option<UnmatchedPayment>> {
        debug_assert!(self.holds(&RowKey::PaymentReference(tx_reference.to_string())));
        match self.changes.unmatched.get(tx_reference) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.backend.unmatched_payment(tx_reference).await,
        }
    }

    fn put_product(&mut self, product: Product) {
        debug_assert!(self.holds(&RowKey::Product(product.id)));
        self.changes.products.insert(product.id, product);
    }

    fn put_account(&mut self, account: Account) {
        debug_assert!(self.holds(&RowKey::Account(account.id)));
        self.changes.accounts.insert(account.id, account);
    }

    fn put_intent(&mut self, intent: DepositIntent) {
        debug_assert!(self.holds(&RowKey::Intent(intent.id)));
        self.changes.intents.insert(intent.id, intent);
    }

    fn append_entry(&mut self, entry: LedgerEntry) {
        debug_assert!(self.holds(&RowKey::Account(entry.account_id)));
        self.changes.entries.push(entry);
    }

    fn insert_order(&mut self, order: Order) {
        self.changes.orders.push(order);
    }

    fn put_unmatched(&mut self, payment: UnmatchedPayment) {
        debug_assert!(self.holds(&RowKey::PaymentReference(payment.tx_reference.clone())));
        self.changes
            .unmatched
            .insert(payment.tx_reference.clone(), payment);
    }

    async fn commit(&mut self) -> Result<()> {
        let changes = std::mem::take(&mut self.changes);
        let result = if changes.is_empty() {
            Ok(())
        } else {
            self.backend.apply(changes).await
        };
        self.held.clear();
        result
    }
}
