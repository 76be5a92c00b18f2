//! # ember-core
//! Foundation types, crypto, and proof of work for the Ember protocol.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod pow;
pub mod sign;
pub mod types;
