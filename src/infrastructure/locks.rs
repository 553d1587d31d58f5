use crate::domain::account::AccountId;
use crate::domain::deposit::IntentId;
use crate::domain::product::ProductId;
use crate::error::{CommerceError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Identity of a lockable row.
///
/// The derived ordering is the global lock acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    PaymentReference(String),
    Intent(IntentId),
    Product(ProductId),
    Account(AccountId),
}

/// Process-wide table of exclusive row locks.
///
/// The table itself is guarded by a short synchronous mutex; waiting for a row happens on the
/// row's async mutex so a blocked unit of work only suspends its own task. A row's entry is
/// dropped again once no holder or waiter references it.
#[derive(Debug, Default)]
pub struct LockTable {
    rows: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive ownership of `key`.
    pub async fn acquire(self: &Arc<Self>, key: &RowKey, timeout: Duration) -> Result<RowGuard> {
        let row = {
            let mut rows = self.rows.lock();
            rows.entry(key.clone()).or_default().clone()
        };
        match tokio::time::timeout(timeout, row.lock_owned()).await {
            Ok(guard) => Ok(RowGuard {
                table: self.clone(),
                key: key.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release(key);
                Err(CommerceError::storage(format!(
                    "timed out after {}ms waiting for lock on {:?}",
                    timeout.as_millis(),
                    key
                )))
            }
        }
    }

    /// Rows currently held or waited on.
    pub fn active_rows(&self) -> usize {
        self.rows.lock().len()
    }

    fn release(&self, key: &RowKey) {
        let mut rows = self.rows.lock();
        // Clones are only taken under `rows`, so a count of one means nobody else can reach it.
        if rows.get(key).is_some_and(|row| Arc::strong_count(row) == 1) {
            rows.remove(key);
        }
    }
}

/// Exclusive ownership of one row until dropped.
pub struct RowGuard {
    table: Arc<LockTable>,
    key: RowKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}
