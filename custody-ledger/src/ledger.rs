//! Balance ledger
//!
//! Single entry point for every balance mutation. Each operation:
//!
//! 1. Acquires the owning account's lock
//! 2. Re-reads the affected rows under that lock
//! 3. Applies pure mutations on the in-memory copies
//! 4. Persists all affected rows in one `WriteBatch`
//!
//! Reads never take the lock; they see the latest committed batch.
//!
//! The reservation model: swaps lock funds on the from-asset balance at
//! creation and hold that reservation until exactly one of `commit_swap`
//! or `refund_swap` runs. Both refuse to run twice, which is what makes
//! "every failed swap refunds exactly once" hold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::locks::{AccountGuard, AccountLocks};
use crate::metrics::Metrics;
use crate::recorder::TransactionRecorder;
use crate::storage::{Storage, StorageStats};
use crate::types::{
    Account, AccountId, Asset, BalanceView, Swap, SwapPhase, SwapRoute, SwapStatus,
};

/// Input for a new swap reservation
#[derive(Debug, Clone)]
pub struct SwapRequest {
    /// Owning account
    pub account: AccountId,
    /// Asset sold
    pub from_asset: Asset,
    /// Amount sold
    pub from_amount: Decimal,
    /// Asset bought
    pub to_asset: Asset,
    /// Output promised by the accepted quote
    pub expected_to_amount: Decimal,
    /// Accepted minimum output
    pub min_to_amount: Decimal,
    /// Service fee
    pub fee: Decimal,
}

/// Balance ledger over per-account locks and batched storage
pub struct BalanceLedger {
    storage: Arc<Storage>,
    locks: Arc<AccountLocks>,
    recorder: Arc<TransactionRecorder>,
    metrics: Metrics,
}

impl BalanceLedger {
    /// Create a ledger over opened storage
    pub fn new(storage: Arc<Storage>, config: &Config, metrics: Metrics) -> Self {
        let locks = Arc::new(AccountLocks::new(Duration::from_millis(
            config.lock_timeout_ms,
        )));
        let recorder = Arc::new(TransactionRecorder::new(
            storage.clone(),
            config.recorder_stripes,
        ));
        Self {
            storage,
            locks,
            recorder,
            metrics,
        }
    }

    pub(crate) fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub(crate) fn recorder(&self) -> &Arc<TransactionRecorder> {
        &self.recorder
    }

    /// Metrics collector backing this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Acquire an account lock, recording the wait latency
    pub(crate) async fn lock_account(&self, account: AccountId) -> Result<AccountGuard> {
        let started = Instant::now();
        let guard = self.locks.acquire(account).await?;
        self.metrics.record_lock_wait(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    // Accounts

    /// Get the account row, creating it on first touch
    pub async fn ensure_account(&self, id: AccountId, external_ref: &str) -> Result<Account> {
        if let Some(account) = self.storage.get_account(id)? {
            return Ok(account);
        }

        let _guard = self.lock_account(id).await?;
        // Re-check under the lock: another task may have won the race
        if let Some(account) = self.storage.get_account(id)? {
            return Ok(account);
        }

        let account = Account {
            id,
            external_ref: external_ref.to_string(),
            created_at: Utc::now(),
        };
        self.storage.put_account(&account)?;
        tracing::info!(account = %id, "Account created");
        Ok(account)
    }

    // Balance reads (lock-free)

    /// Balance snapshot for one asset; absent rows read as zero
    pub fn get_balance(&self, account: AccountId, asset: &Asset) -> Result<BalanceView> {
        Ok(BalanceView::from(&self.storage.get_balance(account, asset)?))
    }

    /// All balance snapshots for an account
    pub fn get_balances(&self, account: AccountId) -> Result<Vec<(Asset, BalanceView)>> {
        let rows = self.storage.account_balances(account)?;
        Ok(rows
            .iter()
            .map(|(asset, balance)| (asset.clone(), BalanceView::from(balance)))
            .collect())
    }

    // Balance mutations
    //
    // Primitive entry points for funds that move outside the pipelines
    // (manual adjustments, migrations). The pipelines compose the same
    // row mutations into their own batches.

    /// Credit an asset balance, creating the row on first touch
    pub async fn credit(
        &self,
        account: AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<BalanceView> {
        let started = Instant::now();
        Self::validate_positive(amount, "amount")?;

        let _guard = self.lock_account(account).await?;
        let mut balance = self.storage.get_balance(account, asset)?;
        balance.credit(amount);
        self.storage.put_balance(account, asset, &balance)?;
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::info!(account = %account, asset = %asset, amount = %amount, "Balance credited");
        Ok(BalanceView::from(&balance))
    }

    /// Debit an asset balance; fails when `amount` exceeds available
    pub async fn debit(
        &self,
        account: AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<BalanceView> {
        let started = Instant::now();
        Self::validate_positive(amount, "amount")?;

        let _guard = self.lock_account(account).await?;
        let mut balance = self.storage.get_balance(account, asset)?;
        balance.debit(asset, amount)?;
        self.storage.put_balance(account, asset, &balance)?;
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::info!(account = %account, asset = %asset, amount = %amount, "Balance debited");
        Ok(BalanceView::from(&balance))
    }

    /// Reserve part of an asset balance without debiting it
    pub async fn lock_funds(
        &self,
        account: AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<BalanceView> {
        let started = Instant::now();
        Self::validate_positive(amount, "amount")?;

        let _guard = self.lock_account(account).await?;
        let mut balance = self.storage.get_balance(account, asset)?;
        balance.lock(asset, amount)?;
        self.storage.put_balance(account, asset, &balance)?;
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::debug!(account = %account, asset = %asset, amount = %amount, "Funds locked");
        Ok(BalanceView::from(&balance))
    }

    /// Release a reservation, flooring `locked` at zero
    pub async fn unlock_funds(
        &self,
        account: AccountId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<BalanceView> {
        let started = Instant::now();
        Self::validate_positive(amount, "amount")?;

        let _guard = self.lock_account(account).await?;
        let mut balance = self.storage.get_balance(account, asset)?;
        balance.unlock(amount);
        self.storage.put_balance(account, asset, &balance)?;
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::debug!(account = %account, asset = %asset, amount = %amount, "Funds unlocked");
        Ok(BalanceView::from(&balance))
    }

    // Swap lifecycle

    /// Get swap by ID
    pub fn get_swap(&self, id: Uuid) -> Result<Swap> {
        self.storage.get_swap(id)
    }

    /// Swaps that have not reached a terminal state
    pub fn swaps_in_flight(&self) -> Result<Vec<Swap>> {
        self.storage.swaps_in_flight()
    }

    /// Reserve funds for a swap and persist it in `Reserved` phase
    pub async fn reserve_swap(&self, request: SwapRequest) -> Result<Swap> {
        let started = Instant::now();

        Self::validate_positive(request.from_amount, "from_amount")?;
        Self::validate_positive(request.expected_to_amount, "expected_to_amount")?;
        Self::validate_positive(request.min_to_amount, "min_to_amount")?;
        if request.fee < Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "fee must not be negative, got {}",
                request.fee
            )));
        }
        if request.from_asset == request.to_asset {
            return Err(Error::InvalidRequest(format!(
                "cannot swap {} into itself",
                request.from_asset
            )));
        }
        if request.min_to_amount > request.expected_to_amount {
            return Err(Error::InvalidRequest(format!(
                "minimum {} exceeds expected output {}",
                request.min_to_amount, request.expected_to_amount
            )));
        }

        let _guard = self.lock_account(request.account).await?;

        let mut from_balance = self
            .storage
            .get_balance(request.account, &request.from_asset)?;
        from_balance.lock(&request.from_asset, request.from_amount)?;

        let now = Utc::now();
        let swap = Swap {
            id: Uuid::now_v7(),
            account: request.account,
            from_asset: request.from_asset,
            from_amount: request.from_amount,
            to_asset: request.to_asset,
            expected_to_amount: request.expected_to_amount,
            min_to_amount: request.min_to_amount,
            actual_to_amount: None,
            route: None,
            order_ref: None,
            phase: SwapPhase::Reserved,
            status: SwapStatus::Pending,
            fee: request.fee,
            fail_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.apply_swap_reserve(&swap, &from_balance)?;
        self.metrics.swaps_reserved.inc();
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::info!(
            swap_id = %swap.id,
            account = %swap.account,
            from = %swap.from_asset,
            to = %swap.to_asset,
            amount = %swap.from_amount,
            "Swap reserved"
        );
        Ok(swap)
    }

    /// Advance a swap to a non-terminal routing phase
    pub async fn update_swap_progress(
        &self,
        id: Uuid,
        phase: SwapPhase,
        route: Option<SwapRoute>,
        order_ref: Option<String>,
    ) -> Result<Swap> {
        let peek = self.storage.get_swap(id)?;
        let _guard = self.lock_account(peek.account).await?;

        let mut swap = self.storage.get_swap(id)?;
        if swap.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "swap {} already {:?}",
                id, swap.phase
            )));
        }
        if phase.is_terminal() {
            return Err(Error::InvalidTransition(
                "terminal phases go through commit_swap or refund_swap".to_string(),
            ));
        }
        if !progress_allowed(swap.phase, phase) {
            return Err(Error::InvalidTransition(format!(
                "swap {}: {:?} -> {:?}",
                id, swap.phase, phase
            )));
        }

        if let Some(route) = route {
            swap.route = Some(route);
        }
        if let Some(order_ref) = order_ref {
            swap.order_ref = Some(order_ref);
        }
        swap.set_phase(phase);
        self.storage.put_swap(&swap)?;

        tracing::debug!(swap_id = %id, phase = ?phase, route = ?swap.route, "Swap progress");
        Ok(swap)
    }

    /// Commit a settled swap: consume the reservation, credit the output
    ///
    /// By the time settlement reports an actual amount the funds have moved
    /// on-chain, so a result below the accepted minimum is still committed
    /// and flagged, not rejected.
    pub async fn commit_swap(&self, id: Uuid, actual_to_amount: Decimal) -> Result<Swap> {
        let started = Instant::now();
        Self::validate_positive(actual_to_amount, "actual_to_amount")?;

        let peek = self.storage.get_swap(id)?;
        let _guard = self.lock_account(peek.account).await?;

        let mut swap = self.storage.get_swap(id)?;
        if swap.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "swap {} already {:?}",
                id, swap.phase
            )));
        }

        if actual_to_amount < swap.min_to_amount {
            tracing::warn!(
                swap_id = %id,
                actual = %actual_to_amount,
                min = %swap.min_to_amount,
                "Settled amount below accepted minimum"
            );
        }

        let mut from_balance = self.storage.get_balance(swap.account, &swap.from_asset)?;
        from_balance.unlock(swap.from_amount);
        from_balance.debit(&swap.from_asset, swap.from_amount)?;

        let mut to_balance = self.storage.get_balance(swap.account, &swap.to_asset)?;
        to_balance.credit(actual_to_amount);

        swap.actual_to_amount = Some(actual_to_amount);
        swap.set_phase(SwapPhase::Completed);

        self.storage
            .apply_swap_commit(&swap, &from_balance, &to_balance)?;
        self.metrics.swaps_committed.inc();
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::info!(
            swap_id = %id,
            account = %swap.account,
            actual = %actual_to_amount,
            route = ?swap.route,
            "Swap committed"
        );
        Ok(swap)
    }

    /// Fail a swap and release its reservation
    ///
    /// Calling this on a terminal swap is an `InvalidTransition`, so a swap
    /// refunds at most once no matter how many failure paths race.
    pub async fn refund_swap(&self, id: Uuid, reason: &str) -> Result<Swap> {
        let started = Instant::now();

        let peek = self.storage.get_swap(id)?;
        let _guard = self.lock_account(peek.account).await?;

        let mut swap = self.storage.get_swap(id)?;
        if swap.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "swap {} already {:?}, refusing refund",
                id, swap.phase
            )));
        }

        let mut from_balance = self.storage.get_balance(swap.account, &swap.from_asset)?;
        from_balance.unlock(swap.from_amount);

        swap.fail_reason = Some(reason.to_string());
        swap.set_phase(SwapPhase::Failed);

        self.storage.apply_swap_refund(&swap, &from_balance)?;
        self.metrics.swaps_refunded.inc();
        self.metrics.record_op_duration(started.elapsed().as_secs_f64());

        tracing::info!(swap_id = %id, account = %swap.account, reason = %reason, "Swap refunded");
        Ok(swap)
    }

    /// Refund reservations that were never handed to a rail and have aged out
    ///
    /// Swaps past `Reserved` belong to the router's recovery, not this sweep.
    pub async fn release_expired_reservations(&self, max_age: Duration) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let mut released = Vec::new();

        for swap in self.storage.swaps_in_flight()? {
            if swap.phase != SwapPhase::Reserved {
                continue;
            }
            let age = now
                .signed_duration_since(swap.created_at)
                .to_std()
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match self.refund_swap(swap.id, "reservation expired").await {
                Ok(_) => released.push(swap.id),
                // Raced with the router resolving it; nothing to do
                Err(Error::InvalidTransition(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !released.is_empty() {
            tracing::info!(count = released.len(), "Released expired reservations");
        }
        Ok(released)
    }

    // Statistics

    /// Storage statistics
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    fn validate_positive(amount: Decimal, what: &str) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "{} must be positive, got {}",
                what, amount
            )));
        }
        Ok(())
    }
}

/// Non-terminal phase transitions the router may request
///
/// A same-phase update is allowed so the router can attach the rail's
/// order reference once a submission is acknowledged.
fn progress_allowed(from: SwapPhase, to: SwapPhase) -> bool {
    use SwapPhase::*;
    if from == to {
        return !from.is_terminal() && from != Created;
    }
    matches!(
        (from, to),
        (Created, Reserved)
            | (Reserved, P2pWaiting)
            | (Reserved, ProtocolPending)
            | (Reserved, DexPending)
            | (P2pWaiting, P2pMatched)
            | (P2pWaiting, ProtocolPending)
            | (P2pWaiting, DexPending)
    )
}
