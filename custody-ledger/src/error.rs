//! Error types for the custody ledger

use crate::types::{AccountId, Asset};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Requested amount exceeds the available (unlocked) balance
    #[error("Insufficient balance for {asset}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Asset the operation targeted
        asset: Asset,
        /// Amount the caller asked for
        requested: Decimal,
        /// Available balance at the time of the check
        available: Decimal,
    },

    /// Account lock not acquired within the configured timeout (retryable)
    #[error("Lock timeout for account {account} after {waited_ms}ms")]
    LockTimeout {
        /// Account whose lock was contended
        account: AccountId,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Amount failed validation (zero, negative, or otherwise malformed)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed or self-contradictory request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Deposit not found
    #[error("Deposit not found: {0}")]
    DepositNotFound(String),

    /// Withdrawal not found
    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(String),

    /// Swap not found
    #[error("Swap not found: {0}")]
    SwapNotFound(String),

    /// Status transition not allowed from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl Error {
    /// True for transient conditions the caller should retry rather than fail
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}
