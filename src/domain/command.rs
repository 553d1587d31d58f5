use super::account::AccountId;
use super::deposit::PaymentEvent;
use super::money::{Amount, DiscountPercent};
use super::product::{NewProduct, ProductId};

/// A single front-end, admin or watcher call replayed through the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Register {
        account: AccountId,
        referrer_code: Option<String>,
    },
    AddProduct(NewProduct),
    SetDiscount {
        product: ProductId,
        percent: DiscountPercent,
    },
    Reserve {
        product: ProductId,
        account: AccountId,
    },
    Release {
        product: ProductId,
        account: AccountId,
    },
    Purchase {
        product: ProductId,
        account: AccountId,
    },
    CreateIntent {
        account: AccountId,
        currency: String,
        hint: Option<Amount>,
    },
    Payment(PaymentEvent),
    Sweep,
}
