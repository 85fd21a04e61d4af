//! SwapRail Custody Ledger
//!
//! Balance accounting for a multi-chain swap service.
//!
//! # Architecture
//!
//! - **Per-account locks**: every mutation serializes on the owning account
//! - **At-most-once credits**: chain events pass an idempotency gate keyed
//!   by `(chain, tx_hash, tx_index)`
//! - **Reservation model**: swaps lock funds until exactly one commit or
//!   refund resolves them
//! - **Batched writes**: each operation persists all affected rows in one
//!   RocksDB `WriteBatch`
//!
//! # Invariants
//!
//! - `0 <= locked <= amount` on every balance, at every observable point
//! - A chain event credits at most once, across sources and replays
//! - Every failed swap or withdrawal refunds exactly once

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod types;
pub mod error;
pub mod config;
pub mod locks;
pub mod storage;
pub mod metrics;
pub mod recorder;
pub mod ledger;
pub mod deposits;
pub mod withdrawals;

// Re-exports
pub use config::Config;
pub use deposits::{AddressDeriver, DepositEvent, DepositOutcome, DepositProcessor};
pub use error::{Error, Result};
pub use ledger::{BalanceLedger, SwapRequest};
pub use metrics::Metrics;
pub use types::{
    Account, AccountId, Asset, Balance, BalanceView, Chain, Deposit, DepositAddress,
    DepositStatus, EventSource, ProcessedTransaction, Swap, SwapPhase, SwapRoute, SwapStatus,
    TxRef, Withdrawal, WithdrawalStatus,
};
pub use withdrawals::{WithdrawalBroadcaster, WithdrawalProcessor};
