//! Error types for settlement rails

use custody_ledger::SwapRoute;
use thiserror::Error;

/// Result type for rail operations
pub type Result<T> = std::result::Result<T, RailError>;

/// Rail errors
#[derive(Error, Debug)]
pub enum RailError {
    /// Rail cannot serve this pair or operation
    #[error("Rail {route} does not support this: {detail}")]
    Unsupported {
        /// Rail that declined
        route: SwapRoute,
        /// What was asked of it
        detail: String,
    },

    /// Rail refused the order outright (bad params, paused pair, limits)
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Unknown order reference
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Rail venue unreachable or returned garbage (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Rail did not answer in time (retryable)
    #[error("Rail timed out after {waited_ms}ms")]
    Timeout {
        /// How long the caller waited
        waited_ms: u64,
    },

    /// No usable quote for the pair right now
    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RailError {
    /// True for transient conditions worth retrying on the same rail
    pub fn is_retryable(&self) -> bool {
        matches!(self, RailError::Transport(_) | RailError::Timeout { .. })
    }
}
