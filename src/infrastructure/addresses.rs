use crate::domain::account::AccountId;
use crate::domain::ports::AddressBook;

/// Deterministic per-account, per-currency receiving addresses.
///
/// Stands in for a wallet service: the same account and currency always map to the same
/// address, which is what lets a pending intent be reused.
#[derive(Debug, Default, Clone, Copy)]
pub struct DerivedAddressBook;

impl AddressBook for DerivedAddressBook {
    fn address_for(&self, account: AccountId, currency: &str) -> String {
        format!("{}:{}", currency.trim().to_lowercase(), account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_are_stable_per_account_and_currency() {
        let book = DerivedAddressBook;
        assert_eq!(book.address_for(AccountId(7), "USDT"), "usdt:7");
        assert_eq!(
            book.address_for(AccountId(7), "usdt"),
            book.address_for(AccountId(7), " USDT ")
        );
        assert_ne!(
            book.address_for(AccountId(7), "BTC"),
            book.address_for(AccountId(8), "BTC")
        );
    }
}
