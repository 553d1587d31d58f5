use crate::domain::account::Account;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

const HEADER: [&str; 5] = ["account", "balance", "referral_earnings", "tier", "referrer"];

#[derive(Debug, Serialize)]
struct AccountRow<'a> {
    account: u64,
    balance: Decimal,
    referral_earnings: Decimal,
    tier: &'a str,
    referrer: Option<u64>,
}

impl<'a> From<&'a Account> for AccountRow<'a> {
    fn from(account: &'a Account) -> Self {
        Self {
            account: account.id.0,
            balance: account.balance.value().normalize(),
            referral_earnings: account.referral_earnings.value().normalize(),
            tier: &account.tier,
            referrer: account.referrer_id.map(|id| id.0),
        }
    }
}

/// Writes final account state as CSV, ordered by account id.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        Self { writer }
    }

    pub fn write_accounts(&mut self, mut accounts: Vec<Account>) -> Result<()> {
        accounts.sort_by_key(|a| a.id);
        self.writer.write_record(HEADER)?;
        for account in &accounts {
            self.writer.serialize(AccountRow::from(account))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
