#![allow(dead_code)]

use commerce_engine::application::engine::CommerceEngine;
use commerce_engine::config::Config;
use commerce_engine::domain::account::AccountId;
use commerce_engine::domain::ledger::EntryReason;
use commerce_engine::domain::money::{Amount, DiscountPercent};
use commerce_engine::domain::product::{NewProduct, ProductId};
use commerce_engine::infrastructure::addresses::DerivedAddressBook;
use commerce_engine::infrastructure::clock::ManualClock;
use commerce_engine::infrastructure::in_memory::InMemoryStore;
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct Fixture {
    pub engine: CommerceEngine,
    pub clock: ManualClock,
}

pub fn fixture() -> Fixture {
    fixture_with(Config::default())
}

pub fn fixture_with(config: Config) -> Fixture {
    let clock = ManualClock::default();
    let engine = CommerceEngine::with_components(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(clock.clone()),
        Arc::new(DerivedAddressBook),
    );
    Fixture { engine, clock }
}

pub async fn register(engine: &CommerceEngine, id: u64, referrer_code: Option<&str>) -> AccountId {
    engine
        .ledger()
        .open_account(AccountId(id), referrer_code)
        .await
        .expect("open account");
    AccountId(id)
}

/// Seeds a balance directly through the ledger.
pub async fn fund(engine: &CommerceEngine, account: AccountId, amount: Decimal) {
    let applied = engine
        .ledger()
        .credit(
            account,
            Amount::new(amount).expect("positive amount"),
            EntryReason::DepositCredit,
            &format!("seed-{account}-{amount}"),
        )
        .await
        .expect("seed credit");
    assert!(applied);
}

pub async fn add_product(
    engine: &CommerceEngine,
    id: u64,
    base_price: Decimal,
    discount: i64,
    category: &str,
) -> ProductId {
    engine
        .catalog()
        .add_product(NewProduct {
            id: ProductId(id),
            name: format!("Item {id}"),
            category: category.to_string(),
            location: None,
            base_price: Amount::new(base_price).expect("positive price"),
            discount_percent: DiscountPercent::new(discount).expect("valid discount"),
        })
        .await
        .expect("add product");
    ProductId(id)
}
