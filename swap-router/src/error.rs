//! Router error types

use thiserror::Error;

/// Result alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors surfaced by the swap router
///
/// Rail failures and settlement timeouts that the router resolves with a
/// refund are not errors here; they come back as a `Failed` swap. An error
/// means the swap could not be resolved: it was rejected up front, or it
/// was left non-terminal for the recovery sweep.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Reservation rejected, no side effects
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The swap is not in a phase this operation accepts
    #[error("Invalid swap state: {0}")]
    InvalidState(String),

    /// Polling stopped by cancellation or shutdown while settlement was
    /// pending; the swap stays non-terminal for the recovery sweep
    #[error("Cancelled while settlement pending; swap left for recovery")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger-side failure
    #[error("Ledger error: {0}")]
    Ledger(#[source] custody_ledger::Error),

    /// Rail unreachable or misbehaving beyond what polling absorbs
    #[error("Rail error: {0}")]
    Rail(#[from] settlement_rails::RailError),
}

impl From<custody_ledger::Error> for RouterError {
    fn from(err: custody_ledger::Error) -> Self {
        match err {
            custody_ledger::Error::InsufficientBalance { .. } => {
                RouterError::InsufficientFunds(err.to_string())
            }
            other => RouterError::Ledger(other),
        }
    }
}

impl RouterError {
    /// True for transient conditions the caller should retry
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::Ledger(e) => e.is_retryable(),
            RouterError::Rail(e) => e.is_retryable(),
            _ => false,
        }
    }
}
