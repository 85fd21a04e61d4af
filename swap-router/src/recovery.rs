//! Recovery sweep for swaps nobody is driving
//!
//! Two jobs on a timer: refund reservations that never started routing,
//! and resolve in-flight swaps whose executor died or was cancelled. The
//! sweep asks the rail what actually happened before touching funds; an
//! unclear answer leaves the swap for the next cycle.

use custody_ledger::BalanceLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::SweepPolicy;
use crate::error::Result;
use crate::metrics;
use crate::router::{SwapRouter, SweepAction};

/// What one sweep cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired reservations refunded by the ledger
    pub released: usize,
    /// In-flight swaps found filled and committed
    pub committed: usize,
    /// In-flight swaps found failed or stale and refunded
    pub refunded: usize,
    /// In-flight swaps still pending, untouched
    pub left: usize,
}

impl SweepStats {
    fn resolved_any(&self) -> bool {
        self.released + self.committed + self.refunded > 0
    }
}

/// Periodic reconciliation of the ledger against the rails
pub struct RecoverySweep {
    ledger: Arc<BalanceLedger>,
    router: Arc<SwapRouter>,
    policy: SweepPolicy,
}

impl RecoverySweep {
    /// Build a sweep over the ledger and router
    pub fn new(ledger: Arc<BalanceLedger>, router: Arc<SwapRouter>, policy: SweepPolicy) -> Self {
        Self {
            ledger,
            router,
            policy,
        }
    }

    /// Run sweep cycles until the shutdown signal fires
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.policy.interval_secs));
        info!(
            interval_secs = self.policy.interval_secs,
            "Recovery sweep started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(stats) if stats.resolved_any() => {
                            info!(
                                released = stats.released,
                                committed = stats.committed,
                                refunded = stats.refunded,
                                left = stats.left,
                                "Sweep cycle resolved swaps"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Sweep cycle failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Recovery sweep stopping");
                    return;
                }
            }
        }
    }

    /// One full pass over reservations and in-flight swaps
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let released = self
            .ledger
            .release_expired_reservations(Duration::from_secs(self.policy.reservation_max_age_secs))
            .await?;
        stats.released = released.len();
        if !released.is_empty() {
            metrics::SWEEP_ACTIONS_TOTAL
                .with_label_values(&["released"])
                .inc_by(released.len() as f64);
        }

        let stale_after = Duration::from_secs(self.policy.stale_after_secs);
        for swap in self.ledger.swaps_in_flight()? {
            match self.router.reconcile(&swap, stale_after).await {
                Ok(SweepAction::Committed) => {
                    stats.committed += 1;
                    metrics::SWEEP_ACTIONS_TOTAL
                        .with_label_values(&["committed"])
                        .inc();
                }
                Ok(SweepAction::Refunded) => {
                    stats.refunded += 1;
                    metrics::SWEEP_ACTIONS_TOTAL
                        .with_label_values(&["refunded"])
                        .inc();
                }
                Ok(SweepAction::Left) => stats.left += 1,
                Ok(SweepAction::Skipped) => {}
                // Rail unreachable or ledger race; the next cycle retries
                Err(e) => {
                    warn!(swap_id = %swap.id, error = %e, "Reconcile failed");
                }
            }
        }

        Ok(stats)
    }
}
