mod common;

use chrono::Duration;
use commerce_engine::domain::ledger::EntryReason;
use commerce_engine::domain::product::{ProductId, ProductStatus};
use commerce_engine::error::CommerceError;
use common::{add_product, fixture, fund, register};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_discounted_purchase_settles_order() {
    let f = fixture();
    let buyer = register(&f.engine, 1, None).await;
    fund(&f.engine, buyer, dec!(85)).await;
    let product = add_product(&f.engine, 10, dec!(100), 20, "keys").await;

    let snapshot = f.engine.reserve(product, buyer).await.unwrap();
    assert_eq!(snapshot.final_price.value(), dec!(80));

    let order = f.engine.purchases().purchase(product, buyer).await.unwrap();
    assert_eq!(order.original_price.value(), dec!(100));
    assert_eq!(order.discount_applied.value(), 20);
    assert_eq!(order.final_price.value(), dec!(80));

    assert_eq!(f.engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(5));
    let stored = f.engine.catalog().product(product).await.unwrap();
    assert!(matches!(stored.status, ProductStatus::Sold(ref sale) if sale.buyer == buyer));
    assert_eq!(f.engine.purchases().orders_for(buyer).await.unwrap(), vec![order]);

    let reconciliation = f.engine.ledger().reconcile(buyer).await.unwrap();
    assert!(reconciliation.is_consistent());
}

#[tokio::test]
async fn test_discount_change_does_not_touch_frozen_price() {
    let f = fixture();
    let buyer = register(&f.engine, 1, None).await;
    fund(&f.engine, buyer, dec!(100)).await;
    let product = add_product(&f.engine, 10, dec!(100), 20, "keys").await;

    f.engine.reserve(product, buyer).await.unwrap();
    f.engine.catalog().set_discount(product, 50).await.unwrap();
    assert_eq!(
        f.engine.catalog().set_category_discount("KEYS", 70).await.unwrap(),
        1
    );

    let order = f.engine.purchases().purchase(product, buyer).await.unwrap();
    assert_eq!(order.final_price.value(), dec!(80));
    assert_eq!(order.discount_applied.value(), 20);
    assert_eq!(f.engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(20));
}

#[tokio::test]
async fn test_insufficient_funds_releases_reservation() {
    let f = fixture();
    let buyer = register(&f.engine, 1, None).await;
    fund(&f.engine, buyer, dec!(50)).await;
    let product = add_product(&f.engine, 10, dec!(100), 0, "keys").await;

    f.engine.reserve(product, buyer).await.unwrap();
    let err = f.engine.purchases().purchase(product, buyer).await.unwrap_err();
    assert!(matches!(
        err,
        CommerceError::InsufficientFunds { balance, required }
            if balance == dec!(50) && required == dec!(100)
    ));

    let stored = f.engine.catalog().product(product).await.unwrap();
    assert!(stored.is_available());
    assert_eq!(f.engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(50));
    assert!(f.engine.purchases().orders_for(buyer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_purchase_requires_own_live_reservation() {
    let f = fixture();
    let holder = register(&f.engine, 1, None).await;
    let other = register(&f.engine, 2, None).await;
    fund(&f.engine, other, dec!(500)).await;
    let product = add_product(&f.engine, 10, dec!(100), 0, "keys").await;

    let err = f.engine.purchases().purchase(product, other).await.unwrap_err();
    assert!(matches!(err, CommerceError::Gone(_)));

    f.engine.reserve(product, holder).await.unwrap();
    let err = f.engine.purchases().purchase(product, other).await.unwrap_err();
    assert!(matches!(err, CommerceError::Gone(_)));

    let err = f.engine.reserve(product, other).await.unwrap_err();
    assert!(matches!(err, CommerceError::Conflict(_)));

    let err = f
        .engine
        .purchases()
        .purchase(ProductId(99), other)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::NotFound(_)));
}

#[tokio::test]
async fn test_refund_is_idempotent_and_product_stays_sold() {
    let f = fixture();
    let buyer = register(&f.engine, 1, None).await;
    fund(&f.engine, buyer, dec!(100)).await;
    let product = add_product(&f.engine, 10, dec!(40), 25, "keys").await;

    f.clock.advance(Duration::seconds(1));
    f.engine.reserve(product, buyer).await.unwrap();
    let order = f.engine.purchases().purchase(product, buyer).await.unwrap();
    assert_eq!(f.engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(70));

    f.clock.advance(Duration::seconds(1));
    assert!(f.engine.purchases().refund_order(order.id).await.unwrap());
    assert!(!f.engine.purchases().refund_order(order.id).await.unwrap());
    assert_eq!(f.engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(100));
    assert!(f.engine.catalog().product(product).await.unwrap().is_sold());

    let reasons: Vec<EntryReason> = f
        .engine
        .ledger()
        .statement(buyer)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.reason)
        .collect();
    assert_eq!(
        reasons,
        vec![EntryReason::DepositCredit, EntryReason::Purchase, EntryReason::Refund]
    );
}

#[tokio::test]
async fn test_browse_lists_available_products_by_category() {
    let f = fixture();
    let buyer = register(&f.engine, 1, None).await;
    add_product(&f.engine, 1, dec!(10), 0, "keys").await;
    add_product(&f.engine, 2, dec!(10), 0, "keys").await;
    add_product(&f.engine, 3, dec!(10), 0, "gift").await;
    f.engine
        .reserve(ProductId(2), buyer)
        .await
        .unwrap();

    let keys = f.engine.catalog().browse(Some("keys")).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id.0, 1);
    assert_eq!(f.engine.catalog().browse(None).await.unwrap().len(), 2);
}
