use super::account::{Account, AccountId};
use super::deposit::{DepositIntent, IntentId, UnmatchedPayment};
use super::ledger::{EntryReason, LedgerEntry};
use super::order::{Order, OrderId};
use super::product::{Product, ProductId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Committed, read-only lookups.
///
/// Never observes writes staged by an uncommitted [`UnitOfWork`].
#[async_trait]
pub trait StoreReader: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;
    async fn products(&self) -> Result<Vec<Product>>;
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;
    async fn accounts(&self) -> Result<Vec<Account>>;
    async fn account_by_referral_code(&self, code: &str) -> Result<Option<Account>>;
    async fn intent(&self, id: IntentId) -> Result<Option<DepositIntent>>;
    async fn intents(&self) -> Result<Vec<DepositIntent>>;
    async fn intents_at_address(&self, address: &str) -> Result<Vec<DepositIntent>>;
    async fn intent_by_reference(&self, tx_reference: &str) -> Result<Option<DepositIntent>>;
    async fn ledger_entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>>;
    async fn entry_exists(
        &self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool>;
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn orders(&self) -> Result<Vec<Order>>;
    async fn unmatched_payment(&self, tx_reference: &str) -> Result<Option<UnmatchedPayment>>;
    async fn unmatched_payments(&self) -> Result<Vec<UnmatchedPayment>>;
}

/// The shared transactional store every component works against.
pub trait Store: StoreReader {
    /// Starts a new unit of work. Nothing is locked until a `lock_*` call.
    fn begin(&self) -> Box<dyn UnitOfWork>;
}

/// A scoped atomic unit of work.
///
/// `lock_*` calls take exclusive row locks that are held until [`UnitOfWork::commit`] or
/// until the unit is dropped. Locking a row twice is a no-op, and reads through a lock return
/// the version staged by this unit if there is one. Dropping without committing discards
/// every staged write.
///
/// Rows must be locked in the order payment reference, intent, product, account, with
/// accounts in ascending id order.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_payment_reference(&mut self, tx_reference: &str)
    -> Result<Option<DepositIntent>>;
    async fn lock_intent(&mut self, id: IntentId) -> Result<Option<DepositIntent>>;
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>>;
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>>;

    async fn entry_exists(
        &mut self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool>;
    /// Requires the payment reference lock.
    async fn unmatched_payment(&mut self, tx_reference: &str) -> Result<Option<UnmatchedPayment>>;

    fn put_product(&mut self, product: Product);
    fn put_account(&mut self, account: Account);
    fn put_intent(&mut self, intent: DepositIntent);
    fn append_entry(&mut self, entry: LedgerEntry);
    fn insert_order(&mut self, order: Order);
    fn put_unmatched(&mut self, payment: UnmatchedPayment);

    /// Applies every staged write at once and releases all locks.
    ///
    /// Fails with `DuplicateEvent` if a payment reference or ledger idempotency key is
    /// already taken, in which case nothing is written.
    async fn commit(&mut self) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Allocates receiving addresses for deposits.
pub trait AddressBook: Send + Sync {
    fn address_for(&self, account: AccountId, currency: &str) -> String;
}

pub type SharedStore = Arc<dyn Store>;
pub type SharedClock = Arc<dyn Clock>;
