use super::unit_of_work::{Backend, ChangeSet, TransactionalStore};
use crate::domain::account::{Account, AccountId};
use crate::domain::deposit::{DepositIntent, IntentId, UnmatchedPayment};
use crate::domain::ledger::{EntryReason, LedgerEntry};
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::StoreReader;
use crate::domain::product::{Product, ProductId};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

type EntryKey = (AccountId, EntryReason, String);

#[derive(Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    accounts: BTreeMap<AccountId, Account>,
    referral_codes: HashMap<String, AccountId>,
    intents: BTreeMap<IntentId, DepositIntent>,
    tx_references: HashMap<String, IntentId>,
    entries: Vec<LedgerEntry>,
    entry_keys: HashSet<EntryKey>,
    orders: BTreeMap<OrderId, Order>,
    unmatched: BTreeMap<String, UnmatchedPayment>,
}

impl Tables {
    /// Checks every unique constraint a change set touches before anything is written.
    fn check(&self, changes: &ChangeSet) -> Result<()> {
        let mut claimed: HashMap<&str, IntentId> = HashMap::new();
        for intent in changes.intents.values() {
            if let Some(reference) = intent.tx_reference.as_deref() {
                let owner = self.tx_references.get(reference).copied();
                let clash = owner.is_some_and(|owner| owner != intent.id)
                    || claimed
                        .insert(reference, intent.id)
                        .is_some_and(|other| other != intent.id);
                if clash {
                    return Err(CommerceError::DuplicateEvent(reference.to_string()));
                }
            }
        }

        let mut keys = HashSet::new();
        for entry in &changes.entries {
            let key = entry.idempotency_key();
            if self.entry_keys.contains(&key) || !keys.insert(key) {
                return Err(CommerceError::DuplicateEvent(format!(
                    "{} {} for account {}",
                    entry.reason, entry.reference_id, entry.account_id
                )));
            }
        }
        Ok(())
    }
}

/// A thread-safe in-memory backend.
///
/// All tables live behind one `tokio::sync::RwLock`, so a commit is applied under a single
/// write guard and readers never observe half of a change set.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

/// In-memory transactional store; the default when no database path is configured.
pub type InMemoryStore = TransactionalStore<MemoryBackend>;

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_backend(MemoryBackend::default())
    }
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreReader for MemoryBackend {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn products(&self) -> Result<Vec<Product>> {
        Ok(self.tables.read().await.products.values().cloned().collect())
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.tables.read().await.accounts.values().cloned().collect())
    }

    async fn account_by_referral_code(&self, code: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .referral_codes
            .get(code)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn intent(&self, id: IntentId) -> Result<Option<DepositIntent>> {
        Ok(self.tables.read().await.intents.get(&id).cloned())
    }

    async fn intents(&self) -> Result<Vec<DepositIntent>> {
        Ok(self.tables.read().await.intents.values().cloned().collect())
    }

    async fn intents_at_address(&self, address: &str) -> Result<Vec<DepositIntent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .intents
            .values()
            .filter(|i| i.address == address)
            .cloned()
            .collect())
    }

    async fn intent_by_reference(&self, tx_reference: &str) -> Result<Option<DepositIntent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tx_references
            .get(tx_reference)
            .and_then(|id| tables.intents.get(id))
            .cloned())
    }

    async fn ledger_entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.account_id == account)
            .cloned()
            .collect())
    }

    async fn entry_exists(
        &self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        let key = (account, reason, reference_id.to_string());
        Ok(self.tables.read().await.entry_keys.contains(&key))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        Ok(self.tables.read().await.orders.values().cloned().collect())
    }

    async fn unmatched_payment(&self, tx_reference: &str) -> Result<Option<UnmatchedPayment>> {
        Ok(self.tables.read().await.unmatched.get(tx_reference).cloned())
    }

    async fn unmatched_payments(&self) -> Result<Vec<UnmatchedPayment>> {
        Ok(self.tables.read().await.unmatched.values().cloned().collect())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check(&changes)?;

        for (id, product) in changes.products {
            tables.products.insert(id, product);
        }
        for (id, account) in changes.accounts {
            tables.referral_codes.insert(account.referral_code.clone(), id);
            tables.accounts.insert(id, account);
        }
        for (id, intent) in changes.intents {
            if let Some(reference) = &intent.tx_reference {
                tables.tx_references.insert(reference.clone(), id);
            }
            tables.intents.insert(id, intent);
        }
        for entry in changes.entries {
            tables.entry_keys.insert(entry.idempotency_key());
            tables.entries.push(entry);
        }
        for order in changes.orders {
            tables.orders.insert(order.id, order);
        }
        for (reference, payment) in changes.unmatched {
            tables.unmatched.insert(reference, payment);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Store;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = InMemoryStore::new();
        let mut uow = store.begin();
        assert!(uow.lock_account(AccountId(1)).await.unwrap().is_none());
        let account = Account::new(AccountId(1), None, "Bronze", Utc::now());
        uow.put_account(account.clone());

        // Staged writes are invisible to committed reads.
        assert!(store.account(AccountId(1)).await.unwrap().is_none());
        assert_eq!(uow.lock_account(AccountId(1)).await.unwrap(), Some(account.clone()));

        uow.commit().await.unwrap();
        assert_eq!(store.account(AccountId(1)).await.unwrap(), Some(account.clone()));
        assert_eq!(
            store.account_by_referral_code("ref-1").await.unwrap(),
            Some(account)
        );
    }

    #[tokio::test]
    async fn test_drop_discards_staged_writes_and_releases_locks() {
        let store = InMemoryStore::new();
        {
            let mut uow = store.begin();
            uow.lock_account(AccountId(1)).await.unwrap();
            uow.put_account(Account::new(AccountId(1), None, "Bronze", Utc::now()));
        }
        assert!(store.account(AccountId(1)).await.unwrap().is_none());

        let mut uow = store.begin();
        assert!(uow.lock_account(AccountId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_entry_key_rejects_whole_commit() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        let mut first = store.begin();
        first.lock_account(AccountId(1)).await.unwrap();
        first.put_account(Account::new(AccountId(1), None, "Bronze", now));
        first.append_entry(LedgerEntry::new(
            AccountId(1),
            dec!(10),
            EntryReason::DepositCredit,
            "intent-1",
            now,
        ));
        first.commit().await.unwrap();

        let mut second = store.begin();
        let mut account = second.lock_account(AccountId(1)).await.unwrap().unwrap();
        account.balance = crate::domain::money::Money::new(dec!(20)).unwrap();
        second.put_account(account);
        second.append_entry(LedgerEntry::new(
            AccountId(1),
            dec!(10),
            EntryReason::DepositCredit,
            "intent-1",
            now,
        ));
        assert!(matches!(
            second.commit().await,
            Err(CommerceError::DuplicateEvent(_))
        ));

        assert_eq!(store.ledger_entries(AccountId(1)).await.unwrap().len(), 1);
        assert!(store.account(AccountId(1)).await.unwrap().unwrap().balance.is_zero());
    }

    #[tokio::test]
    async fn test_tx_reference_unique_across_intents() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let amount = crate::domain::money::Amount::new(dec!(5)).unwrap();

        let mut a = DepositIntent::new(AccountId(1), "BTC", "btc:1", None, now);
        a.complete("tx-1", amount, now).unwrap();
        let mut uow = store.begin();
        uow.lock_intent(a.id).await.unwrap();
        uow.put_intent(a.clone());
        uow.commit().await.unwrap();
        assert_eq!(store.intent_by_reference("tx-1").await.unwrap(), Some(a));

        let mut b = DepositIntent::new(AccountId(2), "BTC", "btc:2", None, now);
        b.complete("tx-1", amount, now).unwrap();
        let mut uow = store.begin();
        uow.lock_intent(b.id).await.unwrap();
        uow.put_intent(b.clone());
        assert!(matches!(
            uow.commit().await,
            Err(CommerceError::DuplicateEvent(_))
        ));
        assert!(store.intent(b.id).await.unwrap().is_none());
    }
}
