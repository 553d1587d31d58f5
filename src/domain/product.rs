use super::account::AccountId;
use super::money::{Amount, DiscountPercent, Money};
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-bound hold on a product, carrying the price frozen when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub holder: AccountId,
    pub reserved_until: DateTime<Utc>,
    pub discount_percent: DiscountPercent,
    pub final_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub buyer: AccountId,
    pub sold_at: DateTime<Utc>,
}

/// `Available → Reserved → Sold`, plus `Reserved → Available` on release or expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProductStatus {
    Available,
    Reserved(Reservation),
    Sold(Sale),
}

/// Catalog import row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub location: Option<String>,
    pub base_price: Amount,
    pub discount_percent: DiscountPercent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub location: Option<String>,
    pub base_price: Amount,
    /// Applies to the next reservation only.
    pub discount_percent: DiscountPercent,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(new: NewProduct, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            name: new.name,
            category: new.category,
            location: new.location,
            base_price: new.base_price,
            discount_percent: new.discount_percent,
            status: ProductStatus::Available,
            created_at: now,
        }
    }

    /// Price a reservation taken right now would freeze.
    pub fn current_price(&self) -> Money {
        self.discount_percent.apply(self.base_price)
    }

    pub fn is_available(&self) -> bool {
        self.status == ProductStatus::Available
    }

    pub fn is_sold(&self) -> bool {
        matches!(self.status, ProductStatus::Sold(_))
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        match &self.status {
            ProductStatus::Reserved(reservation) => Some(reservation),
            _ => None,
        }
    }

    pub fn reserved_by(&self) -> Option<AccountId> {
        self.reservation().map(|r| r.holder)
    }

    pub fn reserved_until(&self) -> Option<DateTime<Utc>> {
        self.reservation().map(|r| r.reserved_until)
    }

    pub fn sold_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            ProductStatus::Sold(sale) => Some(sale.sold_at),
            _ => None,
        }
    }

    pub fn reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.reserved_until().is_some_and(|until| until < now)
    }

    /// Holds the product for `holder`, freezing the discounted price.
    pub fn reserve(
        &mut self,
        holder: AccountId,
        reserved_until: DateTime<Utc>,
    ) -> Result<Reservation, CommerceError> {
        if !self.is_available() {
            return Err(CommerceError::Conflict(format!(
                "product {} is not available",
                self.id
            )));
        }
        let reservation = Reservation {
            holder,
            reserved_until,
            discount_percent: self.discount_percent,
            final_price: self.current_price(),
        };
        self.status = ProductStatus::Reserved(reservation.clone());
        Ok(reservation)
    }

    /// Reverts a reservation. Returns `false` when there was nothing to release.
    pub fn release(&mut self) -> bool {
        if self.reservation().is_some() {
            self.status = ProductStatus::Available;
            true
        } else {
            false
        }
    }

    /// Returns the reservation held by `holder` if it is still within its deadline.
    pub fn live_reservation(
        &self,
        holder: AccountId,
        now: DateTime<Utc>,
    ) -> Result<&Reservation, CommerceError> {
        match self.reservation() {
            Some(reservation) if reservation.holder == holder && reservation.reserved_until >= now => {
                Ok(reservation)
            }
            Some(reservation) if reservation.holder == holder => Err(CommerceError::Gone(format!(
                "reservation of product {} expired at {}",
                self.id, reservation.reserved_until
            ))),
            _ => Err(CommerceError::Gone(format!(
                "product {} is not reserved by account {}",
                self.id, holder
            ))),
        }
    }

    /// Terminal `Reserved → Sold` transition. The holder's reservation must still be live.
    pub fn mark_sold(
        &mut self,
        expected_holder: AccountId,
        now: DateTime<Utc>,
    ) -> Result<Reservation, CommerceError> {
        let reservation = self.live_reservation(expected_holder, now)?.clone();
        self.status = ProductStatus::Sold(Sale {
            buyer: expected_holder,
            sold_at: now,
        });
        Ok(reservation)
    }
}
