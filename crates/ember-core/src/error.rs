//! Error types for the Ember protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58 character")] InvalidCharacter,
    #[error("invalid payload length: {0}")] InvalidLength(usize),
    #[error("checksum mismatch")] InvalidChecksum,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key bytes")] InvalidSecretKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("dangling input: unknown previous transaction {0}")] DanglingInput(String),
    #[error("transaction verification failed")] VerificationFailed,
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("transaction not found: {0}")] NotFound(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error(transparent)] Address(#[from] AddressError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("mining canceled")] Canceled,
    #[error("nonce space exhausted")] Exhausted,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blockchain already exists")] AlreadyExists,
    #[error("not found: {0}")] NotFound(String),
    #[error("storage backend: {0}")] Backend(String),
    #[error("corrupt record: {0}")] Corrupt(String),
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("malformed message: {0}")] Malformed(String),
    #[error("unknown command: {0}")] UnknownCommand(String),
}

#[derive(Error, Debug)]
pub enum EmberError {
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Tx(#[from] TxError),
    #[error(transparent)] Pow(#[from] PowError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Net(#[from] NetError),
}
