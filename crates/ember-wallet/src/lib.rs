//! # ember-wallet
//! P-256 key-pair wallets and their on-disk collection.

pub mod wallet;

pub use wallet::{Wallet, WalletError, Wallets};
