use super::catalog::{Actor, CatalogManager, ReservationSnapshot};
use super::deposits::DepositEngine;
use super::ledger::BalanceLedger;
use super::purchase::PurchaseCoordinator;
use super::scheduler::{PeriodicHandle, spawn_periodic};
use super::sweeper::ReservationSweeper;
use crate::config::Config;
use crate::domain::account::{Account, AccountId};
use crate::domain::command::Command;
use crate::domain::ports::{AddressBook, SharedClock, SharedStore};
use crate::domain::product::ProductId;
use crate::error::Result;
use crate::infrastructure::addresses::DerivedAddressBook;
use crate::infrastructure::clock::SystemClock;
use std::sync::Arc;
use tracing::debug;

/// The main entry point for front-ends, admin tooling and the payment watcher.
///
/// `CommerceEngine` wires the five components over one shared store. It holds no
/// authoritative state of its own, so several engines over the same store behave like one.
pub struct CommerceEngine {
    config: Config,
    store: SharedStore,
    ledger: BalanceLedger,
    catalog: CatalogManager,
    purchases: PurchaseCoordinator,
    deposits: DepositEngine,
    sweeper: ReservationSweeper,
}

impl CommerceEngine {
    /// Creates an engine using wall-clock time and derived deposit addresses.
    pub fn new(config: Config, store: SharedStore) -> Self {
        Self::with_components(
            config,
            store,
            Arc::new(SystemClock),
            Arc::new(DerivedAddressBook),
        )
    }

    pub fn with_components(
        config: Config,
        store: SharedStore,
        clock: SharedClock,
        addresses: Arc<dyn AddressBook>,
    ) -> Self {
        let ledger = BalanceLedger::new(store.clone(), clock.clone(), config.referral.tiers.clone());
        let catalog = CatalogManager::new(store.clone(), clock.clone());
        let purchases =
            PurchaseCoordinator::new(store.clone(), clock.clone(), catalog.clone(), ledger.clone());
        let deposits = DepositEngine::new(
            store.clone(),
            clock.clone(),
            addresses,
            ledger.clone(),
            config.deposits.clone(),
            config.referral.commission_rate,
        );
        let sweeper = ReservationSweeper::new(catalog.clone(), deposits.clone(), clock);

        Self {
            config,
            store,
            ledger,
            catalog,
            purchases,
            deposits,
            sweeper,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn purchases(&self) -> &PurchaseCoordinator {
        &self.purchases
    }

    pub fn deposits(&self) -> &DepositEngine {
        &self.deposits
    }

    pub fn sweeper(&self) -> &ReservationSweeper {
        &self.sweeper
    }

    /// Reserves with the configured TTL.
    pub async fn reserve(&self, product: ProductId, user: AccountId) -> Result<ReservationSnapshot> {
        self.catalog
            .reserve(product, user, self.config.reservation.ttl())
            .await
    }

    /// Starts the expiry sweeper on the configured interval.
    pub fn start_sweeper(&self) -> PeriodicHandle {
        spawn_periodic(
            Arc::new(self.sweeper.clone()),
            self.config.reservation.sweep_interval(),
        )
    }

    /// Replays one scripted command.
    pub async fn process_command(&self, command: Command) -> Result<()> {
        debug!(?command, "Processing command");
        match command {
            Command::Register {
                account,
                referrer_code,
            } => {
                self.ledger
                    .open_account(account, referrer_code.as_deref())
                    .await?;
            }
            Command::AddProduct(product) => {
                self.catalog.add_product(product).await?;
            }
            Command::SetDiscount { product, percent } => {
                self.catalog
                    .set_discount(product, i64::from(percent.value()))
                    .await?;
            }
            Command::Reserve { product, account } => {
                self.reserve(product, account).await?;
            }
            Command::Release { product, account } => {
                self.catalog.release(product, Actor::User(account)).await?;
            }
            Command::Purchase { product, account } => {
                self.purchases.purchase(product, account).await?;
            }
            Command::CreateIntent {
                account,
                currency,
                hint,
            } => {
                self.deposits
                    .create_deposit_intent(account, &currency, hint)
                    .await?;
            }
            Command::Payment(event) => {
                self.deposits.on_external_payment_observed(event).await?;
            }
            Command::Sweep => {
                self.sweeper.sweep().await?;
            }
        }
        Ok(())
    }

    /// Consumes the engine and returns the committed state of all accounts.
    pub async fn into_accounts(self) -> Result<Vec<Account>> {
        self.store.accounts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deposit::PaymentEvent;
    use crate::domain::money::{Amount, DiscountPercent};
    use crate::domain::ports::Clock;
    use crate::domain::product::NewProduct;
    use crate::error::CommerceError;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryStore;
    use rust_decimal_macros::dec;

    fn engine() -> (CommerceEngine, ManualClock) {
        let clock = ManualClock::default();
        let engine = CommerceEngine::with_components(
            Config::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(clock.clone()),
            Arc::new(DerivedAddressBook),
        );
        (engine, clock)
    }

    #[tokio::test]
    async fn test_scripted_flow() {
        let (engine, _clock) = engine();
        let commands = vec![
            Command::Register {
                account: AccountId(1),
                referrer_code: None,
            },
            Command::Register {
                account: AccountId(2),
                referrer_code: Some("ref-1".into()),
            },
            Command::AddProduct(NewProduct {
                id: ProductId(1),
                name: "Item".into(),
                category: "keys".into(),
                location: None,
                base_price: Amount::new(dec!(100)).unwrap(),
                discount_percent: DiscountPercent::new(20).unwrap(),
            }),
            Command::CreateIntent {
                account: AccountId(2),
                currency: "usdt".into(),
                hint: None,
            },
            Command::Payment(PaymentEvent {
                address: "usdt:2".into(),
                amount: Amount::new(dec!(100)).unwrap(),
                tx_reference: "tx-1".into(),
                confirmations: 3,
            }),
            Command::Reserve {
                product: ProductId(1),
                account: AccountId(2),
            },
            Command::Purchase {
                product: ProductId(1),
                account: AccountId(2),
            },
        ];
        for command in commands {
            engine.process_command(command).await.unwrap();
        }

        let accounts = engine.into_accounts().await.unwrap();
        let buyer = accounts.iter().find(|a| a.id == AccountId(2)).unwrap();
        let referrer = accounts.iter().find(|a| a.id == AccountId(1)).unwrap();
        assert_eq!(buyer.balance.value(), dec!(20));
        assert_eq!(referrer.referral_earnings.value(), dec!(3));
    }

    #[tokio::test]
    async fn test_reserve_uses_configured_ttl() {
        let (engine, clock) = engine();
        engine
            .process_command(Command::Register {
                account: AccountId(1),
                referrer_code: None,
            })
            .await
            .unwrap();
        engine
            .catalog()
            .add_product(NewProduct {
                id: ProductId(5),
                name: "Item".into(),
                category: "keys".into(),
                location: None,
                base_price: Amount::new(dec!(10)).unwrap(),
                discount_percent: DiscountPercent::NONE,
            })
            .await
            .unwrap();

        let snapshot = engine.reserve(ProductId(5), AccountId(1)).await.unwrap();
        assert_eq!(
            snapshot.reserved_until - clock.now(),
            chrono::Duration::seconds(900)
        );

        let err = engine
            .process_command(Command::Purchase {
                product: ProductId(5),
                account: AccountId(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientFunds { .. }));
    }
}
