use super::unit_of_work::{Backend, ChangeSet, TransactionalStore};
use crate::domain::account::{Account, AccountId};
use crate::domain::deposit::{DepositIntent, IntentId, UnmatchedPayment};
use crate::domain::ledger::{EntryReason, LedgerEntry};
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::StoreReader;
use crate::domain::product::{Product, ProductId};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

/// Column Family for product rows.
pub const CF_PRODUCTS: &str = "products";
/// Column Family for account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Index: referral code to account id.
pub const CF_REFERRAL_CODES: &str = "referral_codes";
/// Column Family for deposit intents.
pub const CF_INTENTS: &str = "intents";
/// Index: payment reference to intent id. Enforces reference uniqueness.
pub const CF_TX_REFERENCES: &str = "tx_references";
/// Append-only ledger, keyed by account id followed by the time-ordered entry id.
pub const CF_ENTRIES: &str = "entries";
/// Index: ledger idempotency keys.
pub const CF_ENTRY_KEYS: &str = "entry_keys";
/// Append-only orders.
pub const CF_ORDERS: &str = "orders";
/// Payments held for manual reconciliation.
pub const CF_UNMATCHED: &str = "unmatched";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_PRODUCTS,
    CF_ACCOUNTS,
    CF_REFERRAL_CODES,
    CF_INTENTS,
    CF_TX_REFERENCES,
    CF_ENTRIES,
    CF_ENTRY_KEYS,
    CF_ORDERS,
    CF_UNMATCHED,
];

/// A persistent backend using RocksDB.
///
/// Every entity lives in its own Column Family, and unique constraints are backed by index
/// families. A change set is checked and written as one `WriteBatch` while `commit_lock` is
/// held, so two commits can never both pass the uniqueness check.
pub struct RocksDbBackend {
    db: DB,
    commit_lock: Mutex<()>,
}

/// Persistent transactional store.
pub type RocksDbStore = TransactionalStore<RocksDbBackend>;

impl RocksDbStore {
    /// Opens or creates the database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_backend(RocksDbBackend::open(path)?))
    }
}

impl RocksDbBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CommerceError::storage(format!("{name} column family not found")))
    }

    fn get<T: DeserializeOwned>(&self, name: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(name)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, name: &str, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(name)?, key)?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, name: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(name)?, IteratorMode::From(prefix, Direction::Forward));
        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        name: &str,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(name)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn check(&self, changes: &ChangeSet) -> Result<()> {
        let mut claimed: HashMap<&str, IntentId> = HashMap::new();
        for intent in changes.intents.values() {
            if let Some(reference) = intent.tx_reference.as_deref() {
                let owner: Option<IntentId> = self.get(CF_TX_REFERENCES, reference)?;
                let clash = owner.is_some_and(|owner| owner != intent.id)
                    || claimed
                        .insert(reference, intent.id)
                        .is_some_and(|other| other != intent.id);
                if clash {
                    return Err(CommerceError::DuplicateEvent(reference.to_string()));
                }
            }
        }

        let mut keys = std::collections::HashSet::new();
        for entry in &changes.entries {
            let key = entry_key(entry.account_id, entry.reason, &entry.reference_id);
            if self.contains(CF_ENTRY_KEYS, &key)? || !keys.insert(key) {
                return Err(CommerceError::DuplicateEvent(format!(
                    "{} {} for account {}",
                    entry.reason, entry.reference_id, entry.account_id
                )));
            }
        }
        Ok(())
    }
}

fn entry_key(account: AccountId, reason: EntryReason, reference_id: &str) -> Vec<u8> {
    format!("{}|{}|{}", account, reason, reference_id).into_bytes()
}

fn ledger_key(entry: &LedgerEntry) -> Vec<u8> {
    let mut key = entry.account_id.0.to_be_bytes().to_vec();
    key.extend_from_slice(entry.id.as_bytes());
    key
}

#[async_trait]
impl StoreReader for RocksDbBackend {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        self.get(CF_PRODUCTS, id.0.to_be_bytes())
    }

    async fn products(&self) -> Result<Vec<Product>> {
        self.scan(CF_PRODUCTS, &[])
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get(CF_ACCOUNTS, id.0.to_be_bytes())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS, &[])
    }

    async fn account_by_referral_code(&self, code: &str) -> Result<Option<Account>> {
        match self.get::<AccountId>(CF_REFERRAL_CODES, code)? {
            Some(id) => self.get(CF_ACCOUNTS, id.0.to_be_bytes()),
            None => Ok(None),
        }
    }

    async fn intent(&self, id: IntentId) -> Result<Option<DepositIntent>> {
        self.get(CF_INTENTS, id.0.as_bytes())
    }

    async fn intents(&self) -> Result<Vec<DepositIntent>> {
        self.scan(CF_INTENTS, &[])
    }

    async fn intents_at_address(&self, address: &str) -> Result<Vec<DepositIntent>> {
        let intents: Vec<DepositIntent> = self.scan(CF_INTENTS, &[])?;
        Ok(intents.into_iter().filter(|i| i.address == address).collect())
    }

    async fn intent_by_reference(&self, tx_reference: &str) -> Result<Option<DepositIntent>> {
        match self.get::<IntentId>(CF_TX_REFERENCES, tx_reference)? {
            Some(id) => self.get(CF_INTENTS, id.0.as_bytes()),
            None => Ok(None),
        }
    }

    async fn ledger_entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>> {
        self.scan(CF_ENTRIES, &account.0.to_be_bytes())
    }

    async fn entry_exists(
        &self,
        account: AccountId,
        reason: EntryReason,
        reference_id: &str,
    ) -> Result<bool> {
        self.contains(CF_ENTRY_KEYS, entry_key(account, reason, reference_id))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get(CF_ORDERS, id.0.as_bytes())
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS, &[])
    }

    async fn unmatched_payment(&self, tx_reference: &str) -> Result<Option<UnmatchedPayment>> {
        self.get(CF_UNMATCHED, tx_reference)
    }

    async fn unmatched_payments(&self) -> Result<Vec<UnmatchedPayment>> {
        self.scan(CF_UNMATCHED, &[])
    }
}

#[async_trait]
impl Backend for RocksDbBackend {
    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.check(&changes)?;

        let mut batch = WriteBatch::default();
        for (id, product) in &changes.products {
            self.put(&mut batch, CF_PRODUCTS, id.0.to_be_bytes(), product)?;
        }
        for (id, account) in &changes.accounts {
            self.put(&mut batch, CF_ACCOUNTS, id.0.to_be_bytes(), account)?;
            self.put(&mut batch, CF_REFERRAL_CODES, &account.referral_code, id)?;
        }
        for (id, intent) in &changes.intents {
            self.put(&mut batch, CF_INTENTS, id.0.as_bytes(), intent)?;
            if let Some(reference) = &intent.tx_reference {
                self.put(&mut batch, CF_TX_REFERENCES, reference, id)?;
            }
        }
        for entry in &changes.entries {
            self.put(&mut batch, CF_ENTRIES, ledger_key(entry), entry)?;
            batch.put_cf(
                self.cf(CF_ENTRY_KEYS)?,
                entry_key(entry.account_id, entry.reason, &entry.reference_id),
                b"",
            );
        }
        for order in &changes.orders {
            self.put(&mut batch, CF_ORDERS, order.id.0.as_bytes(), order)?;
        }
        for (reference, payment) in &changes.unmatched {
            self.put(&mut batch, CF_UNMATCHED, reference, payment)?;
        }

        self.db.write(batch)?;
        Ok(())
    }
}
