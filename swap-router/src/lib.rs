//! SwapRail Swap Router
//!
//! Drives reserved swaps across the settlement rails to a terminal state.
//!
//! # Execution model
//!
//! - **P2P first**: a counter-order goes to the matching desk, bounded by
//!   a configured wait
//! - **Static fallback**: no match falls back to exactly one rail chosen
//!   by the source asset's class, protocol for native coins and the DEX
//!   aggregator for contract tokens
//! - **Exactly one resolution**: every execution path ends in a single
//!   ledger commit or refund; the ledger rejects a second
//! - **Recovery owns the unclear cases**: cancellation or a crash while
//!   an external settlement is pending never guesses an outcome, the
//!   sweep reconciles against the rail later

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod config;
pub mod metrics;
pub mod router;
pub mod recovery;

// Re-exports
pub use config::{FallbackPolicy, P2pPolicy, RouterConfig, SweepPolicy};
pub use error::{Result, RouterError};
pub use recovery::{RecoverySweep, SweepStats};
pub use router::{SwapRouter, SweepAction};
