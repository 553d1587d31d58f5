use super::catalog::CatalogManager;
use super::ledger::BalanceLedger;
use crate::domain::account::AccountId;
use crate::domain::ledger::EntryReason;
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::{SharedClock, SharedStore};
use crate::domain::product::ProductId;
use crate::error::{CommerceError, Result};
use tracing::{info, warn};

/// Settles a reserved product against the buyer's balance in one unit of work.
#[derive(Clone)]
pub struct PurchaseCoordinator {
    store: SharedStore,
    clock: SharedClock,
    catalog: CatalogManager,
    ledger: BalanceLedger,
}

impl PurchaseCoordinator {
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        catalog: CatalogManager,
        ledger: BalanceLedger,
    ) -> Self {
        Self {
            store,
            clock,
            catalog,
            ledger,
        }
    }

    /// Buys `product_id` for `user` at the price frozen when it was reserved.
    ///
    /// The product row stays locked from the ownership check until commit, so of two racing
    /// purchases only one can see its own live reservation; the other fails with `Gone`. If the
    /// balance does not cover the price the reservation is released and `InsufficientFunds`
    /// is returned with nothing else written.
    pub async fn purchase(&self, product_id: ProductId, user: AccountId) -> Result<Order> {
        let now = self.clock.now();
        let mut uow = self.store.begin();

        let mut product = uow
            .lock_product(product_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {product_id}")))?;
        let reservation = product.live_reservation(user, now)?.clone();

        let account = uow
            .lock_account(user)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("account {user}")))?;

        if account.balance < reservation.final_price {
            product.release();
            uow.put_product(product);
            uow.commit().await?;
            warn!(
                product = %product_id,
                account = %user,
                balance = %account.balance,
                price = %reservation.final_price,
                "Purchase rejected, reservation released"
            );
            return Err(CommerceError::InsufficientFunds {
                balance: account.balance.value(),
                required: reservation.final_price.value(),
            });
        }

        let order = Order {
            id: OrderId::generate(),
            user_id: user,
            product_id,
            original_price: product.base_price,
            discount_applied: reservation.discount_percent,
            final_price: reservation.final_price,
            created_at: now,
        };
        self.ledger
            .debit_within(
                uow.as_mut(),
                user,
                reservation.final_price,
                EntryReason::Purchase,
                &order.id.to_string(),
            )
            .await?;
        self.catalog
            .mark_sold_within(uow.as_mut(), product_id, user, now)
            .await?;
        uow.insert_order(order.clone());
        uow.commit().await?;

        info!(
            order = %order.id,
            product = %product_id,
            account = %user,
            price = %order.final_price,
            "Purchase settled"
        );
        Ok(order)
    }

    /// Credits the buyer the order's final price. The product stays sold.
    ///
    /// Returns `false` if the order was already refunded.
    pub async fn refund_order(&self, order_id: OrderId) -> Result<bool> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("order {order_id}")))?;

        let mut uow = self.store.begin();
        let applied = self
            .ledger
            .credit_within(
                uow.as_mut(),
                order.user_id,
                order.final_price,
                EntryReason::Refund,
                &order_id.to_string(),
            )
            .await?;
        uow.commit().await?;
        if applied {
            info!(order = %order_id, account = %order.user_id, amount = %order.final_price, "Order refunded");
        }
        Ok(applied)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("order {order_id}")))
    }

    pub async fn orders_for(&self, user: AccountId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .store
            .orders()
            .await?
            .into_iter()
            .filter(|o| o.user_id == user)
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }
}
