use crate::domain::account::AccountId;
use crate::domain::money::{Amount, DiscountPercent, Money};
use crate::domain::ports::{SharedClock, SharedStore, UnitOfWork};
use crate::domain::product::{NewProduct, Product, ProductId, Reservation};
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Who is asking for a reservation to be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(AccountId),
    Sweeper,
}

/// What a front-end renders after a successful reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationSnapshot {
    pub product_id: ProductId,
    pub holder: AccountId,
    pub reserved_until: DateTime<Utc>,
    pub base_price: Amount,
    pub discount_percent: DiscountPercent,
    /// Frozen; carried unchanged into the order.
    pub final_price: Money,
}

/// Inventory state machine with time-bound holds.
#[derive(Clone)]
pub struct CatalogManager {
    store: SharedStore,
    clock: SharedClock,
}

impl CatalogManager {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Catalog import. Fails with `Conflict` if the id is taken.
    pub async fn add_product(&self, new: NewProduct) -> Result<Product> {
        let mut uow = self.store.begin();
        if uow.lock_product(new.id).await?.is_some() {
            return Err(CommerceError::Conflict(format!(
                "product {} already exists",
                new.id
            )));
        }
        let product = Product::new(new, self.clock.now());
        uow.put_product(product.clone());
        uow.commit().await?;
        info!(product = %product.id, price = %product.base_price, "Product added");
        Ok(product)
    }

    pub async fn product(&self, id: ProductId) -> Result<Product> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {id}")))
    }

    /// Available products, optionally restricted to one category.
    pub async fn browse(&self, category: Option<&str>) -> Result<Vec<Product>> {
        let products = self.store.products().await?;
        Ok(products
            .into_iter()
            .filter(|p| p.is_available())
            .filter(|p| category.is_none_or(|c| p.category.eq_ignore_ascii_case(c)))
            .collect())
    }

    /// Holds `product_id` for `user` until `now + ttl`, freezing the discounted price.
    pub async fn reserve(
        &self,
        product_id: ProductId,
        user: AccountId,
        ttl: Duration,
    ) -> Result<ReservationSnapshot> {
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| {
                CommerceError::ValidationError("reservation ttl out of range".to_string())
            })?;
        let now = self.clock.now();
        let reserved_until = now.checked_add_signed(ttl).ok_or_else(|| {
            CommerceError::ValidationError("reservation ttl out of range".to_string())
        })?;
        if self.store.account(user).await?.is_none() {
            return Err(CommerceError::NotFound(format!("account {user}")));
        }

        let mut uow = self.store.begin();
        let mut product = uow
            .lock_product(product_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {product_id}")))?;
        let reservation = product.reserve(user, reserved_until)?;
        let snapshot = ReservationSnapshot {
            product_id,
            holder: user,
            reserved_until,
            base_price: product.base_price,
            discount_percent: reservation.discount_percent,
            final_price: reservation.final_price,
        };
        uow.put_product(product);
        uow.commit().await?;

        info!(
            product = %product_id,
            account = %user,
            final_price = %snapshot.final_price,
            until = %reserved_until,
            "Product reserved"
        );
        Ok(snapshot)
    }

    /// Reverts `Reserved → Available`.
    ///
    /// A user may only release their own hold (`Gone` otherwise). The sweeper only releases
    /// holds whose deadline has passed, checked under the row lock. Returns `false` when
    /// nothing changed, including when the product is already sold.
    pub async fn release(&self, product_id: ProductId, actor: Actor) -> Result<bool> {
        let mut uow = self.store.begin();
        let mut product = uow
            .lock_product(product_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {product_id}")))?;

        let Some(holder) = product.reserved_by() else {
            debug!(product = %product_id, ?actor, "Nothing to release");
            return Ok(false);
        };
        match actor {
            Actor::User(user) if user != holder => {
                return Err(CommerceError::Gone(format!(
                    "product {product_id} is not reserved by account {user}"
                )));
            }
            Actor::Sweeper if !product.reservation_expired(self.clock.now()) => {
                debug!(product = %product_id, "Reservation renewed before sweep");
                return Ok(false);
            }
            _ => {}
        }

        product.release();
        uow.put_product(product);
        uow.commit().await?;
        info!(product = %product_id, account = %holder, ?actor, "Reservation released");
        Ok(true)
    }

    /// Terminal `Reserved → Sold` in its own unit of work.
    pub async fn mark_sold(
        &self,
        product_id: ProductId,
        expected_reserved_by: AccountId,
    ) -> Result<Reservation> {
        let mut uow = self.store.begin();
        let reservation = self
            .mark_sold_within(uow.as_mut(), product_id, expected_reserved_by, self.clock.now())
            .await?;
        uow.commit().await?;
        Ok(reservation)
    }

    /// Stages `Reserved → Sold` inside the caller's unit of work.
    pub async fn mark_sold_within(
        &self,
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        expected_reserved_by: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut product = uow
            .lock_product(product_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {product_id}")))?;
        let reservation = product.mark_sold(expected_reserved_by, now)?;
        uow.put_product(product);
        Ok(reservation)
    }

    /// Admin write. Only affects reservations taken afterwards.
    pub async fn set_discount(&self, product_id: ProductId, percent: i64) -> Result<Product> {
        let percent = DiscountPercent::new(percent)?;
        let mut uow = self.store.begin();
        let mut product = uow
            .lock_product(product_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("product {product_id}")))?;
        product.discount_percent = percent;
        uow.put_product(product.clone());
        uow.commit().await?;
        info!(product = %product_id, %percent, "Discount updated");
        Ok(product)
    }

    /// Bulk admin write over one category, applied atomically. Returns how many products changed.
    pub async fn set_category_discount(&self, category: &str, percent: i64) -> Result<usize> {
        let percent = DiscountPercent::new(percent)?;
        let mut ids: Vec<ProductId> = self
            .store
            .products()
            .await?
            .into_iter()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .map(|p| p.id)
            .collect();
        ids.sort();

        let mut uow = self.store.begin();
        let mut updated = 0;
        for id in ids {
            if let Some(mut product) = uow.lock_product(id).await? {
                product.discount_percent = percent;
                uow.put_product(product);
                updated += 1;
            }
        }
        uow.commit().await?;
        info!(category, %percent, updated, "Category discount updated");
        Ok(updated)
    }

    /// Reserved products whose deadline is before `now`.
    pub async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<ProductId>> {
        Ok(self
            .store
            .products()
            .await?
            .into_iter()
            .filter(|p| p.reservation_expired(now))
            .map(|p| p.id)
            .collect())
    }
}
