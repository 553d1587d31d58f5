mod common;

use commerce_engine::application::catalog::Actor;
use commerce_engine::domain::account::AccountId;
use commerce_engine::domain::deposit::{PaymentEvent, PaymentOutcome};
use commerce_engine::domain::money::Amount;
use commerce_engine::domain::ports::StoreReader;
use commerce_engine::error::CommerceError;
use common::{add_product, fixture, fund, register};
use rust_decimal_macros::dec;
use std::sync::Arc;

const RACERS: u64 = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reserve_race_has_single_winner() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    for id in 1..=RACERS {
        register(&engine, id, None).await;
    }
    let product = add_product(&engine, 1, dec!(10), 0, "keys").await;

    let mut handles = Vec::new();
    for id in 1..=RACERS {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.reserve(product, AccountId(id)).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(snapshot) => winners.push(snapshot.holder),
            Err(CommerceError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let stored = engine.catalog().product(product).await.unwrap();
    assert_eq!(stored.reserved_by(), Some(winners[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_purchases_create_one_order() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    let buyer = register(&engine, 1, None).await;
    let rival = register(&engine, 2, None).await;
    fund(&engine, buyer, dec!(100)).await;
    fund(&engine, rival, dec!(100)).await;
    let product = add_product(&engine, 1, dec!(60), 0, "keys").await;

    engine.reserve(product, buyer).await.unwrap();

    // The holder double-submits while a rival also tries to buy.
    let contenders = [buyer, buyer, rival, buyer];
    let mut handles = Vec::new();
    for user in contenders {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.purchases().purchase(product, user).await
        }));
    }

    let mut orders = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => orders.push(order),
            Err(CommerceError::Gone(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].user_id, buyer);

    let all_orders: Vec<_> = engine
        .store()
        .orders()
        .await
        .unwrap()
        .into_iter()
        .filter(|o| o.product_id == product)
        .collect();
    assert_eq!(all_orders.len(), 1);
    assert_eq!(engine.ledger().balance_of(buyer).await.unwrap().value(), dec!(40));
    assert_eq!(engine.ledger().balance_of(rival).await.unwrap().value(), dec!(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payment_replays_credit_once() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    register(&engine, 1, None).await;
    let user = register(&engine, 2, Some("ref-1")).await;
    let intent = engine
        .deposits()
        .create_deposit_intent(user, "usdt", None)
        .await
        .unwrap();

    let event = PaymentEvent {
        address: intent.address.clone(),
        amount: Amount::new(dec!(100)).unwrap(),
        tx_reference: "tx-replayed".to_string(),
        confirmations: 12,
    };
    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let engine = engine.clone();
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            engine.deposits().on_external_payment_observed(event).await
        }));
    }

    let mut credited = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            PaymentOutcome::Credited { .. } => credited += 1,
            PaymentOutcome::Duplicate { intent_id } => {
                assert_eq!(intent_id, intent.id);
                duplicates += 1;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(credited, 1);
    assert_eq!(duplicates, RACERS - 1);
    assert_eq!(engine.ledger().balance_of(user).await.unwrap().value(), dec!(100));
    assert_eq!(
        engine
            .ledger()
            .account(AccountId(1))
            .await
            .unwrap()
            .referral_earnings
            .value(),
        dec!(3)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deposits_accumulate_commission() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    let referrer = register(&engine, 1, None).await;
    for id in 2..=RACERS + 1 {
        let user = register(&engine, id, Some("ref-1")).await;
        engine
            .deposits()
            .create_deposit_intent(user, "usdt", None)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for id in 2..=RACERS + 1 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .deposits()
                .on_external_payment_observed(PaymentEvent {
                    address: format!("usdt:{id}"),
                    amount: Amount::new(dec!(100)).unwrap(),
                    tx_reference: format!("tx-{id}"),
                    confirmations: 3,
                })
                .await
        }));
    }
    for handle in handles {
        assert!(matches!(
            handle.await.unwrap().unwrap(),
            PaymentOutcome::Credited { .. }
        ));
    }

    let account = engine.ledger().account(referrer).await.unwrap();
    assert_eq!(account.referral_earnings.value(), dec!(24));
    assert!(engine.ledger().reconcile(referrer).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_purchase_and_release_race_is_consistent() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    let buyer = register(&engine, 1, None).await;
    fund(&engine, buyer, dec!(10)).await;
    let product = add_product(&engine, 1, dec!(10), 0, "keys").await;
    engine.reserve(product, buyer).await.unwrap();

    let purchase = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.purchases().purchase(product, buyer).await })
    };
    let release = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .catalog()
                .release(product, Actor::User(buyer))
                .await
        })
    };
    let purchased = purchase.await.unwrap();
    let released = release.await.unwrap();

    let stored = engine.catalog().product(product).await.unwrap();
    let balance = engine.ledger().balance_of(buyer).await.unwrap().value();
    match purchased {
        Ok(_) => {
            assert!(stored.is_sold());
            assert!(!released.unwrap());
            assert_eq!(balance, dec!(0));
        }
        Err(CommerceError::Gone(_)) => {
            assert!(stored.is_available());
            assert!(released.unwrap());
            assert_eq!(balance, dec!(10));
        }
        Err(e) => panic!("unexpected error {e}"),
    }
}
