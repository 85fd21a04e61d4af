//! Hybrid swap execution
//!
//! A reserved swap tries the P2P matching desk first, bounded by a wait;
//! no counterparty in time means one fallback leg chosen by the source
//! asset's class, never a runtime race between rails. Failure on a leg
//! that took custody of the order refunds the reservation, and the ledger
//! guarantees that refund happens exactly once.
//!
//! Cancellation while an external settlement is pending does not guess an
//! outcome: polling stops and the swap stays in its pending phase until
//! the recovery sweep learns what the rail actually did.

use chrono::Utc;
use custody_ledger::{
    AccountId, Asset, BalanceLedger, Swap, SwapPhase, SwapRequest, SwapRoute,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use settlement_rails::{
    AdapterRegistry, AssetClassTable, OrderRequest, OrderStatus, QuoteAggregator, RailError,
    RailQuote, SettlementAdapter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::metrics;

/// What the recovery sweep did with one in-flight swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Rail reported a fill, swap committed
    Committed,
    /// Rail reported failure or the swap went stale, reservation refunded
    Refunded,
    /// Still pending, left alone
    Left,
    /// Owned by a live executor or not sweepable, untouched
    Skipped,
}

enum P2pOutcome {
    /// The swap reached a terminal state on the P2P leg
    Terminal(Swap),
    /// No counterparty took the order; fall back
    NoMatch(String),
}

/// Drives reserved swaps through the rails to a terminal state
pub struct SwapRouter {
    ledger: Arc<BalanceLedger>,
    registry: Arc<AdapterRegistry>,
    classes: AssetClassTable,
    aggregator: QuoteAggregator,
    config: RouterConfig,
    active: DashMap<Uuid, watch::Sender<bool>>,
}

impl SwapRouter {
    /// Build a router over a ledger and a fixed set of rails
    pub fn new(
        ledger: Arc<BalanceLedger>,
        registry: Arc<AdapterRegistry>,
        classes: AssetClassTable,
        config: RouterConfig,
    ) -> Self {
        let aggregator = QuoteAggregator::new(
            registry.clone(),
            Duration::from_millis(config.quote_timeout_ms),
        );
        Self {
            ledger,
            registry,
            classes,
            aggregator,
            config,
            active: DashMap::new(),
        }
    }

    /// Best executable quote across the registered rails
    pub async fn best_quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        Ok(self
            .aggregator
            .best_quote(from_asset, from_amount, to_asset)
            .await?)
    }

    /// Quote the pair and reserve the source funds
    ///
    /// The accepted minimum is fixed here from the quote and the
    /// configured slippage tolerance; execution never renegotiates it.
    pub async fn create_swap(
        &self,
        account: AccountId,
        from_asset: Asset,
        from_amount: Decimal,
        to_asset: Asset,
    ) -> Result<Swap> {
        let quote = self
            .aggregator
            .best_quote(&from_asset, from_amount, &to_asset)
            .await?;

        let bps = Decimal::from(10_000u32);
        let fee = quote.to_amount * Decimal::from(self.config.service_fee_bps) / bps;
        let expected = quote.to_amount - fee;
        let min = expected * (Decimal::ONE - Decimal::from(self.config.slippage_bps) / bps);

        let swap = self
            .ledger
            .reserve_swap(SwapRequest {
                account,
                from_asset,
                from_amount,
                to_asset,
                expected_to_amount: expected,
                min_to_amount: min,
                fee,
            })
            .await?;

        tracing::info!(
            swap_id = %swap.id,
            account = %swap.account,
            quoted_route = %quote.route,
            expected = %expected,
            min = %min,
            "Swap reserved"
        );
        Ok(swap)
    }

    /// Drive a reserved swap to a terminal state
    ///
    /// Returns the terminal swap when the router resolved it, including
    /// the refund paths. An error means the swap is still non-terminal.
    pub async fn execute(&self, swap_id: Uuid) -> Result<Swap> {
        let swap = self.ledger.get_swap(swap_id)?;
        if swap.phase != SwapPhase::Reserved {
            return Err(RouterError::InvalidState(format!(
                "swap {} is {:?}, expected Reserved",
                swap_id, swap.phase
            )));
        }

        let cancel_rx = match self.active.entry(swap_id) {
            Entry::Occupied(_) => {
                return Err(RouterError::InvalidState(format!(
                    "swap {} is already executing",
                    swap_id
                )))
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert(tx);
                rx
            }
        };
        let _active = ActiveEntry {
            active: &self.active,
            swap_id,
        };

        let started = Instant::now();
        let result = self.drive(swap, cancel_rx).await;
        if let Ok(done) = &result {
            let route = route_label(done.route);
            metrics::EXECUTION_DURATION_SECONDS
                .with_label_values(&[route])
                .observe(started.elapsed().as_secs_f64());
        }
        result
    }

    /// Signal cancellation for a swap
    ///
    /// A swap still sitting in Reserved is refunded immediately. A swap
    /// with a live executor gets the signal and resolves per phase. Returns
    /// whether the request took effect.
    pub async fn request_cancel(&self, swap_id: Uuid) -> Result<bool> {
        if let Some(entry) = self.active.get(&swap_id) {
            let delivered = entry.value().send(true).is_ok();
            tracing::info!(swap_id = %swap_id, "Cancellation signalled to executor");
            return Ok(delivered);
        }

        let swap = self.ledger.get_swap(swap_id)?;
        match swap.phase {
            SwapPhase::Reserved => {
                self.refund(&swap, "cancelled before routing".to_string())
                    .await?;
                Ok(true)
            }
            phase if phase.is_terminal() => Ok(false),
            phase => {
                tracing::warn!(
                    swap_id = %swap_id,
                    phase = ?phase,
                    "Cancel requested for unattended in-flight swap; recovery sweep owns it"
                );
                Ok(false)
            }
        }
    }

    /// Resolve one in-flight swap from its persisted state
    ///
    /// Called by the recovery sweep after a crash or an abandoned
    /// cancellation. Polls the rail once when there is an order reference;
    /// otherwise refunds once the swap has gone stale.
    pub async fn reconcile(&self, swap: &Swap, stale_after: Duration) -> Result<SweepAction> {
        if swap.phase.is_terminal() || swap.phase == SwapPhase::Reserved {
            return Ok(SweepAction::Skipped);
        }
        if self.active.contains_key(&swap.id) {
            return Ok(SweepAction::Skipped);
        }

        let age = Utc::now()
            .signed_duration_since(swap.updated_at)
            .to_std()
            .unwrap_or_default();

        let (order_ref, route) = match (&swap.order_ref, swap.route) {
            (Some(order_ref), Some(route)) => (order_ref, route),
            _ => {
                if age < stale_after {
                    return Ok(SweepAction::Left);
                }
                self.refund(swap, "abandoned before order submission".to_string())
                    .await?;
                return Ok(SweepAction::Refunded);
            }
        };

        let adapter = self.registry.get(route)?;
        match adapter.poll_status(order_ref).await? {
            OrderStatus::Filled { to_amount } => {
                self.commit(swap, to_amount).await?;
                Ok(SweepAction::Committed)
            }
            OrderStatus::Failed { reason } => {
                self.refund(swap, format!("{} settlement failed: {}", route, reason))
                    .await?;
                Ok(SweepAction::Refunded)
            }
            OrderStatus::Cancelled => {
                self.refund(swap, format!("{} cancelled the order", route))
                    .await?;
                Ok(SweepAction::Refunded)
            }
            OrderStatus::Working if swap.phase == SwapPhase::P2pWaiting && age >= stale_after => {
                // An open counter-order long past its wait window. Pull it
                // first; a refused cancel means it matched under us.
                match adapter.cancel(order_ref).await {
                    Ok(()) => {
                        self.refund(swap, "no counterparty before expiry".to_string())
                            .await?;
                        Ok(SweepAction::Refunded)
                    }
                    Err(e) => {
                        tracing::warn!(
                            swap_id = %swap.id,
                            error = %e,
                            "Stale counter-order refused cancellation, leaving"
                        );
                        Ok(SweepAction::Left)
                    }
                }
            }
            _ => Ok(SweepAction::Left),
        }
    }

    async fn drive(&self, swap: Swap, mut cancel_rx: watch::Receiver<bool>) -> Result<Swap> {
        let mut p2p_attempted = false;

        if self.config.p2p.enabled {
            if let Ok(adapter) = self.registry.get(SwapRoute::P2p) {
                if adapter.supports(&swap.from_asset, &swap.to_asset) {
                    p2p_attempted = true;
                    match self.attempt_p2p(&swap, adapter, &mut cancel_rx).await? {
                        P2pOutcome::Terminal(done) => return Ok(done),
                        P2pOutcome::NoMatch(reason) => {
                            tracing::info!(
                                swap_id = %swap.id,
                                reason = %reason,
                                "P2P leg yielded no match, selecting fallback"
                            );
                        }
                    }
                }
            }
        }

        let route = self.classes.fallback_for(&swap.from_asset);
        metrics::FALLBACKS_TOTAL
            .with_label_values(&[
                if p2p_attempted { "p2p" } else { "none" },
                &route.to_string(),
            ])
            .inc();

        let adapter = match self.registry.get(route) {
            Ok(adapter) if adapter.supports(&swap.from_asset, &swap.to_asset) => adapter,
            _ => {
                return self
                    .refund(
                        &swap,
                        format!(
                            "no {} route for {}/{}",
                            route, swap.from_asset, swap.to_asset
                        ),
                    )
                    .await;
            }
        };

        self.attempt_fallback(&swap, route, adapter, &mut cancel_rx)
            .await
    }

    async fn attempt_p2p(
        &self,
        swap: &Swap,
        adapter: Arc<dyn SettlementAdapter>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<P2pOutcome> {
        self.ledger
            .update_swap_progress(swap.id, SwapPhase::P2pWaiting, Some(SwapRoute::P2p), None)
            .await?;

        let request = self.order_request(swap, self.config.p2p.wait_secs);
        let ack = match adapter.submit(&request).await {
            Ok(ack) => ack,
            Err(e) if !e.is_retryable() => {
                return Ok(P2pOutcome::NoMatch(format!("desk rejected order: {}", e)));
            }
            // Unknown whether the order went live; the sweep will find out
            Err(e) => return Err(e.into()),
        };
        self.ledger
            .update_swap_progress(
                swap.id,
                SwapPhase::P2pWaiting,
                None,
                Some(ack.order_ref.clone()),
            )
            .await?;
        tracing::info!(
            swap_id = %swap.id,
            order_ref = %ack.order_ref,
            wait_secs = self.config.p2p.wait_secs,
            "Counter-order posted, waiting for a match"
        );

        let poll = Duration::from_millis(self.config.p2p.poll_interval_ms);
        let mut deadline = Instant::now() + Duration::from_secs(self.config.p2p.wait_secs);
        let mut matched = false;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        if matched {
                            tracing::warn!(
                                swap_id = %swap.id,
                                "Cancelled after match; atomic settlement left for recovery"
                            );
                            return Err(RouterError::Cancelled);
                        }
                        // Refund only once the desk confirms the pull; a
                        // refused or failed cancel may mean a live match
                        match adapter.cancel(&ack.order_ref).await {
                            Ok(()) => {
                                let done =
                                    self.refund(swap, "cancelled by user".to_string()).await?;
                                return Ok(P2pOutcome::Terminal(done));
                            }
                            Err(e) => {
                                tracing::warn!(
                                    swap_id = %swap.id,
                                    error = %e,
                                    "Cancel not confirmed by desk; swap left for recovery"
                                );
                                return Err(RouterError::Cancelled);
                            }
                        }
                    }
                }
                _ = sleep(poll) => {
                    let status = match adapter.poll_status(&ack.order_ref).await {
                        Ok(status) => {
                            failures = 0;
                            status
                        }
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(
                                swap_id = %swap.id,
                                error = %e,
                                failures,
                                "P2P status poll failed"
                            );
                            if failures >= self.config.max_poll_failures {
                                return Err(e.into());
                            }
                            continue;
                        }
                    };

                    match status {
                        OrderStatus::Working => {
                            if Instant::now() >= deadline {
                                match adapter.cancel(&ack.order_ref).await {
                                    Ok(()) => {
                                        return Ok(P2pOutcome::NoMatch(format!(
                                            "no counterparty within {}s",
                                            self.config.p2p.wait_secs
                                        )));
                                    }
                                    Err(RailError::Rejected(_)) => {
                                        // Matched while we were timing out; the
                                        // next poll will see it
                                        tracing::info!(
                                            swap_id = %swap.id,
                                            "Cancel refused at timeout, order matched under us"
                                        );
                                    }
                                    Err(e) => return Err(e.into()),
                                }
                            }
                        }
                        OrderStatus::Matched => {
                            if !matched {
                                matched = true;
                                self.ledger
                                    .update_swap_progress(
                                        swap.id,
                                        SwapPhase::P2pMatched,
                                        None,
                                        None,
                                    )
                                    .await?;
                                deadline = Instant::now()
                                    + Duration::from_secs(self.config.fallback.confirm_wait_secs);
                                tracing::info!(
                                    swap_id = %swap.id,
                                    "Counterparty matched, atomic settlement running"
                                );
                            } else if Instant::now() >= deadline {
                                let done = self
                                    .refund(
                                        swap,
                                        format!(
                                            "settlement timeout after {}s on p2p",
                                            self.config.fallback.confirm_wait_secs
                                        ),
                                    )
                                    .await?;
                                return Ok(P2pOutcome::Terminal(done));
                            }
                        }
                        OrderStatus::Filled { to_amount } => {
                            let done = self.commit(swap, to_amount).await?;
                            return Ok(P2pOutcome::Terminal(done));
                        }
                        OrderStatus::Failed { reason } => {
                            if matched {
                                // A partially executed atomic swap must not be
                                // replayed through another rail
                                let done = self
                                    .refund(swap, format!("p2p settlement failed: {}", reason))
                                    .await?;
                                return Ok(P2pOutcome::Terminal(done));
                            }
                            return Ok(P2pOutcome::NoMatch(format!("desk failed order: {}", reason)));
                        }
                        OrderStatus::Cancelled => {
                            if matched {
                                let done = self
                                    .refund(swap, "desk cancelled after match".to_string())
                                    .await?;
                                return Ok(P2pOutcome::Terminal(done));
                            }
                            return Ok(P2pOutcome::NoMatch("desk cancelled the order".to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn attempt_fallback(
        &self,
        swap: &Swap,
        route: SwapRoute,
        adapter: Arc<dyn SettlementAdapter>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<Swap> {
        let quote = match adapter
            .quote(&swap.from_asset, swap.from_amount, &swap.to_asset)
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                return self
                    .refund(swap, format!("{} quote failed: {}", route, e))
                    .await;
            }
        };
        if quote.to_asset != swap.to_asset {
            return self
                .refund(
                    swap,
                    format!("{} rail substituted output asset {}", route, quote.to_asset),
                )
                .await;
        }
        if quote.to_amount < swap.min_to_amount {
            tracing::warn!(
                swap_id = %swap.id,
                quoted = %quote.to_amount,
                min = %swap.min_to_amount,
                "Fallback quote below accepted minimum, proceeding"
            );
        }

        let phase = match route {
            SwapRoute::Protocol => SwapPhase::ProtocolPending,
            SwapRoute::Dex => SwapPhase::DexPending,
            SwapRoute::P2p => {
                return Err(RouterError::InvalidState(
                    "p2p is not a fallback rail".to_string(),
                ))
            }
        };
        self.ledger
            .update_swap_progress(swap.id, phase, Some(route), None)
            .await?;

        let request = self.order_request(swap, self.config.fallback.confirm_wait_secs);
        let ack = match adapter.submit(&request).await {
            Ok(ack) => ack,
            Err(e) if !e.is_retryable() => {
                return self
                    .refund(swap, format!("{} rejected order: {}", route, e))
                    .await;
            }
            // Possibly in flight without a reference; the sweep decides
            Err(e) => return Err(e.into()),
        };
        self.ledger
            .update_swap_progress(swap.id, phase, None, Some(ack.order_ref.clone()))
            .await?;
        tracing::info!(
            swap_id = %swap.id,
            route = %route,
            order_ref = %ack.order_ref,
            "Fallback settlement submitted"
        );

        let poll = Duration::from_millis(self.config.fallback.poll_interval_ms);
        let deadline = Instant::now() + Duration::from_secs(self.config.fallback.confirm_wait_secs);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        tracing::warn!(
                            swap_id = %swap.id,
                            route = %route,
                            "Cancelled while settlement pending; outcome left for recovery"
                        );
                        return Err(RouterError::Cancelled);
                    }
                }
                _ = sleep(poll) => {
                    match adapter.poll_status(&ack.order_ref).await {
                        Ok(OrderStatus::Filled { to_amount }) => {
                            return self.commit(swap, to_amount).await;
                        }
                        Ok(OrderStatus::Failed { reason }) => {
                            return self
                                .refund(swap, format!("{} settlement failed: {}", route, reason))
                                .await;
                        }
                        Ok(OrderStatus::Cancelled) => {
                            return self
                                .refund(swap, format!("{} cancelled the order", route))
                                .await;
                        }
                        Ok(_) => {
                            if Instant::now() >= deadline {
                                return self
                                    .refund(
                                        swap,
                                        format!(
                                            "settlement timeout after {}s on {}",
                                            self.config.fallback.confirm_wait_secs, route
                                        ),
                                    )
                                    .await;
                            }
                        }
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(
                                swap_id = %swap.id,
                                route = %route,
                                error = %e,
                                failures,
                                "Settlement status poll failed"
                            );
                            if failures >= self.config.max_poll_failures {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn commit(&self, swap: &Swap, gross: Decimal) -> Result<Swap> {
        let mut net = gross - swap.fee;
        if net <= Decimal::ZERO {
            tracing::warn!(
                swap_id = %swap.id,
                gross = %gross,
                fee = %swap.fee,
                "Fee exceeds settled output, waiving fee"
            );
            net = gross;
        }
        let done = self.ledger.commit_swap(swap.id, net).await?;
        metrics::SWAPS_EXECUTED_TOTAL
            .with_label_values(&[route_label(done.route), "completed"])
            .inc();
        Ok(done)
    }

    async fn refund(&self, swap: &Swap, reason: String) -> Result<Swap> {
        let done = self.ledger.refund_swap(swap.id, &reason).await?;
        metrics::SWAPS_EXECUTED_TOTAL
            .with_label_values(&[route_label(done.route), "failed"])
            .inc();
        Ok(done)
    }

    fn order_request(&self, swap: &Swap, wait_secs: u64) -> OrderRequest {
        OrderRequest {
            swap_id: swap.id,
            from_asset: swap.from_asset.clone(),
            from_amount: swap.from_amount,
            to_asset: swap.to_asset.clone(),
            min_to_amount: swap.min_to_amount,
            deadline: Some(Utc::now() + chrono::Duration::seconds(wait_secs as i64)),
        }
    }
}

fn route_label(route: Option<SwapRoute>) -> &'static str {
    match route {
        Some(SwapRoute::P2p) => "p2p",
        Some(SwapRoute::Protocol) => "protocol",
        Some(SwapRoute::Dex) => "dex",
        None => "none",
    }
}

struct ActiveEntry<'a> {
    active: &'a DashMap<Uuid, watch::Sender<bool>>,
    swap_id: Uuid,
}

impl Drop for ActiveEntry<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.swap_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_ledger::SwapStatus;

    fn swap_fixture() -> Swap {
        Swap {
            id: Uuid::new_v4(),
            account: AccountId::new(7),
            from_asset: Asset::new("BTC"),
            from_amount: Decimal::new(15, 1),
            to_asset: Asset::new("ETH"),
            expected_to_amount: Decimal::from(30),
            min_to_amount: Decimal::new(297, 1),
            actual_to_amount: None,
            route: None,
            order_ref: None,
            phase: SwapPhase::Reserved,
            status: SwapStatus::Pending,
            fee: Decimal::ZERO,
            fail_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_route_label() {
        assert_eq!(route_label(Some(SwapRoute::P2p)), "p2p");
        assert_eq!(route_label(Some(SwapRoute::Protocol)), "protocol");
        assert_eq!(route_label(Some(SwapRoute::Dex)), "dex");
        assert_eq!(route_label(None), "none");
    }

    #[test]
    fn test_order_request_carries_reservation_terms() {
        let (router, _dir) = test_router();
        let swap = swap_fixture();

        let request = router.order_request(&swap, 180);

        assert_eq!(request.swap_id, swap.id);
        assert_eq!(request.from_amount, swap.from_amount);
        assert_eq!(request.min_to_amount, swap.min_to_amount);
        let deadline = request.deadline.unwrap();
        assert!(deadline > Utc::now() + chrono::Duration::seconds(170));
        assert!(deadline <= Utc::now() + chrono::Duration::seconds(180));
    }

    #[test]
    fn test_active_entry_clears_on_drop() {
        let (router, _dir) = test_router();
        let id = Uuid::new_v4();
        let (tx, _rx) = watch::channel(false);
        router.active.insert(id, tx);
        {
            let _guard = ActiveEntry {
                active: &router.active,
                swap_id: id,
            };
            assert!(router.active.contains_key(&id));
        }
        assert!(!router.active.contains_key(&id));
    }

    fn test_router() -> (SwapRouter, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut ledger_config = custody_ledger::Config::default();
        ledger_config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(custody_ledger::storage::Storage::open(&ledger_config).unwrap());
        let ledger = Arc::new(BalanceLedger::new(
            storage,
            &ledger_config,
            custody_ledger::Metrics::new().unwrap(),
        ));
        let router = SwapRouter::new(
            ledger,
            Arc::new(AdapterRegistry::new()),
            AssetClassTable::new(),
            RouterConfig::default(),
        );
        (router, temp_dir)
    }
}
