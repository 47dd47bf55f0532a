//! Error types for dmint resolution and claiming

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmintError {
    #[error("Chain request failed: {0}")]
    Chain(String),

    #[error("Transaction decoding failed: {0}")]
    TransactionDecode(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Contract invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Missing session state: {0}")]
    MissingState(&'static str),
}

impl From<serde_json::Error> for DmintError {
    fn from(err: serde_json::Error) -> Self {
        DmintError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for DmintError {
    fn from(err: hex::FromHexError) -> Self {
        DmintError::TransactionDecode(err.to_string())
    }
}

impl From<secp256k1::Error> for DmintError {
    fn from(err: secp256k1::Error) -> Self {
        DmintError::Signing(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DmintError>;
