use crate::domain::account::AccountId;
use crate::domain::command::Command;
use crate::domain::deposit::PaymentEvent;
use crate::domain::money::{Amount, DiscountPercent};
use crate::domain::product::{NewProduct, ProductId};
use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Register,
    Product,
    Discount,
    Reserve,
    Release,
    Purchase,
    Intent,
    Payment,
    Sweep,
}

/// One script row. Which columns are required depends on `op`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRecord {
    pub op: Op,
    #[serde(default)]
    pub account: Option<u64>,
    #[serde(default)]
    pub product: Option<u64>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub percent: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u32>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn required<T>(value: Option<T>, op: Op, column: &str) -> Result<T> {
    value.ok_or_else(|| {
        CommerceError::ValidationError(format!("{op:?} row is missing '{column}'"))
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl TryFrom<CommandRecord> for Command {
    type Error = CommerceError;

    fn try_from(row: CommandRecord) -> Result<Self> {
        let op = row.op;
        let account = || required(row.account, op, "account").map(AccountId);
        let product = || required(row.product, op, "product").map(ProductId);

        let command = match op {
            Op::Register => Command::Register {
                account: account()?,
                referrer_code: non_empty(row.code.clone()),
            },
            Op::Product => {
                let id = product()?;
                Command::AddProduct(NewProduct {
                    id,
                    name: non_empty(row.name.clone()).unwrap_or_else(|| format!("product {id}")),
                    category: non_empty(row.category.clone()).unwrap_or_default(),
                    location: non_empty(row.address.clone()),
                    base_price: Amount::new(required(row.amount, op, "amount")?)?,
                    discount_percent: DiscountPercent::new(row.percent.unwrap_or(0))?,
                })
            }
            Op::Discount => Command::SetDiscount {
                product: product()?,
                percent: DiscountPercent::new(required(row.percent, op, "percent")?)?,
            },
            Op::Reserve => Command::Reserve {
                product: product()?,
                account: account()?,
            },
            Op::Release => Command::Release {
                product: product()?,
                account: account()?,
            },
            Op::Purchase => Command::Purchase {
                product: product()?,
                account: account()?,
            },
            Op::Intent => Command::CreateIntent {
                account: account()?,
                currency: required(non_empty(row.currency.clone()), op, "currency")?,
                hint: row.amount.map(Amount::new).transpose()?,
            },
            Op::Payment => Command::Payment(PaymentEvent {
                address: required(non_empty(row.address.clone()), op, "address")?,
                amount: Amount::new(required(row.amount, op, "amount")?)?,
                tx_reference: required(non_empty(row.reference.clone()), op, "reference")?,
                confirmations: required(row.confirmations, op, "confirmations")?,
            }),
            Op::Sweep => Command::Sweep,
        };
        Ok(command)
    }
}

/// Reads scripted commands from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths, so rows only
/// need the columns their `op` uses.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads, deserializes and validates each row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(CommerceError::from).and_then(Command::try_from))
    }
}
