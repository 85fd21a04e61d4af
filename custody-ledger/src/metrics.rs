//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `custody_deposits_credited_total` - Deposits credited to a balance
//! - `custody_deposits_duplicate_total` - Replayed events short-circuited
//! - `custody_deposits_unrecognized_total` - Events to unknown addresses
//! - `custody_swaps_reserved_total` - Swap reservations taken
//! - `custody_swaps_committed_total` - Swaps committed
//! - `custody_swaps_refunded_total` - Swaps refunded
//! - `custody_withdrawals_requested_total` - Withdrawals debited
//! - `custody_withdrawals_completed_total` - Withdrawals confirmed on-chain
//! - `custody_withdrawals_refunded_total` - Withdrawals refunded
//! - `custody_lock_wait_seconds` - Account lock acquisition latency
//! - `custody_op_duration_seconds` - End-to-end ledger operation latency

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Deposits credited
    pub deposits_credited: IntCounter,

    /// Duplicate chain events short-circuited
    pub deposits_duplicate: IntCounter,

    /// Events to unrecognized addresses
    pub deposits_unrecognized: IntCounter,

    /// Swap reservations taken
    pub swaps_reserved: IntCounter,

    /// Swaps committed
    pub swaps_committed: IntCounter,

    /// Swaps refunded
    pub swaps_refunded: IntCounter,

    /// Withdrawals debited
    pub withdrawals_requested: IntCounter,

    /// Withdrawals confirmed on-chain
    pub withdrawals_completed: IntCounter,

    /// Withdrawals refunded
    pub withdrawals_refunded: IntCounter,

    /// Account lock acquisition latency
    pub lock_wait: Histogram,

    /// Ledger operation latency
    pub op_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_credited = IntCounter::with_opts(Opts::new(
            "custody_deposits_credited_total",
            "Deposits credited to a balance",
        ))?;
        registry.register(Box::new(deposits_credited.clone()))?;

        let deposits_duplicate = IntCounter::with_opts(Opts::new(
            "custody_deposits_duplicate_total",
            "Replayed chain events short-circuited",
        ))?;
        registry.register(Box::new(deposits_duplicate.clone()))?;

        let deposits_unrecognized = IntCounter::with_opts(Opts::new(
            "custody_deposits_unrecognized_total",
            "Chain events to unknown addresses",
        ))?;
        registry.register(Box::new(deposits_unrecognized.clone()))?;

        let swaps_reserved = IntCounter::with_opts(Opts::new(
            "custody_swaps_reserved_total",
            "Swap reservations taken",
        ))?;
        registry.register(Box::new(swaps_reserved.clone()))?;

        let swaps_committed = IntCounter::with_opts(Opts::new(
            "custody_swaps_committed_total",
            "Swaps committed",
        ))?;
        registry.register(Box::new(swaps_committed.clone()))?;

        let swaps_refunded = IntCounter::with_opts(Opts::new(
            "custody_swaps_refunded_total",
            "Swaps refunded",
        ))?;
        registry.register(Box::new(swaps_refunded.clone()))?;

        let withdrawals_requested = IntCounter::with_opts(Opts::new(
            "custody_withdrawals_requested_total",
            "Withdrawals debited",
        ))?;
        registry.register(Box::new(withdrawals_requested.clone()))?;

        let withdrawals_completed = IntCounter::with_opts(Opts::new(
            "custody_withdrawals_completed_total",
            "Withdrawals confirmed on-chain",
        ))?;
        registry.register(Box::new(withdrawals_completed.clone()))?;

        let withdrawals_refunded = IntCounter::with_opts(Opts::new(
            "custody_withdrawals_refunded_total",
            "Withdrawals refunded",
        ))?;
        registry.register(Box::new(withdrawals_refunded.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new(
                "custody_lock_wait_seconds",
                "Account lock acquisition latency",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        let op_duration = Histogram::with_opts(
            HistogramOpts::new(
                "custody_op_duration_seconds",
                "End-to-end ledger operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(op_duration.clone()))?;

        Ok(Self {
            deposits_credited,
            deposits_duplicate,
            deposits_unrecognized,
            swaps_reserved,
            swaps_committed,
            swaps_refunded,
            withdrawals_requested,
            withdrawals_completed,
            withdrawals_refunded,
            lock_wait,
            op_duration,
            registry,
        })
    }

    /// Record lock acquisition latency
    pub fn record_lock_wait(&self, seconds: f64) {
        self.lock_wait.observe(seconds);
    }

    /// Record operation latency
    pub fn record_op_duration(&self, seconds: f64) {
        self.op_duration.observe(seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
