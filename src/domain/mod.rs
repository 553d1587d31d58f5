pub mod account;
pub mod command;
pub mod deposit;
pub mod ledger;
pub mod money;
pub mod order;
pub mod ports;
pub mod product;
pub mod referral;
