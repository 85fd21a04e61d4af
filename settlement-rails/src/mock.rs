//! Mock rail for tests and local runs
//!
//! Orders sit in memory and only move when a test moves them, so router
//! tests can walk an order through match, fill or failure one step at a
//! time. Optional latency and a success rate make it behave enough like a
//! real venue for soak runs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use custody_ledger::{Asset, SwapRoute};
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::adapter::SettlementAdapter;
use crate::error::{RailError, Result};
use crate::types::{OrderAck, OrderRequest, OrderStatus, RailQuote};

struct MockOrder {
    request: OrderRequest,
    status: OrderStatus,
    polls: u32,
}

/// In-memory rail with manual and scripted order control
pub struct MockRailAdapter {
    route: SwapRoute,
    latency_ms: u64,
    success_rate: f64,
    pairs: Option<Vec<(Asset, Asset)>>,
    rates: HashMap<(Asset, Asset), Decimal>,
    auto_fill: Option<Decimal>,
    match_after_polls: Option<u32>,
    fill_after_polls: Option<(u32, Decimal)>,
    fail_after_polls: Option<(u32, String)>,
    orders: RwLock<HashMap<String, MockOrder>>,
    seq: AtomicU64,
}

impl MockRailAdapter {
    /// A rail that accepts every pair, quotes 1:1 and never fails
    pub fn new(route: SwapRoute) -> Self {
        Self {
            route,
            latency_ms: 0,
            success_rate: 1.0,
            pairs: None,
            rates: HashMap::new(),
            auto_fill: None,
            match_after_polls: None,
            fill_after_polls: None,
            fail_after_polls: None,
            orders: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Restrict supported pairs (directional)
    pub fn with_pairs(mut self, pairs: Vec<(Asset, Asset)>) -> Self {
        self.pairs = Some(pairs);
        self
    }

    /// Quote `rate` units of `to` per unit of `from` instead of 1:1
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates.insert((Asset::new(from), Asset::new(to)), rate);
        self
    }

    /// Sleep this long on every call
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Reject submissions randomly with probability `1 - rate`
    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate;
        self
    }

    /// Fill every order at submit time with this amount
    pub fn with_auto_fill(mut self, to_amount: Decimal) -> Self {
        self.auto_fill = Some(to_amount);
        self
    }

    /// Script: report Matched once an order has been polled this many times
    pub fn with_match_after_polls(mut self, polls: u32) -> Self {
        self.match_after_polls = Some(polls);
        self
    }

    /// Script: report a fill once an order has been polled this many times
    pub fn with_fill_after_polls(mut self, polls: u32, to_amount: Decimal) -> Self {
        self.fill_after_polls = Some((polls, to_amount));
        self
    }

    /// Script: report failure once an order has been polled this many times
    pub fn with_fail_after_polls(mut self, polls: u32, reason: &str) -> Self {
        self.fail_after_polls = Some((polls, reason.to_string()));
        self
    }

    /// Mark an open order as matched
    pub async fn match_order(&self, order_ref: &str) -> Result<()> {
        self.set_status(order_ref, OrderStatus::Matched).await
    }

    /// Fill an order with the given output amount
    pub async fn complete_order(&self, order_ref: &str, to_amount: Decimal) -> Result<()> {
        self.set_status(order_ref, OrderStatus::Filled { to_amount })
            .await
    }

    /// Fail an order with a venue-side reason
    pub async fn fail_order(&self, order_ref: &str, reason: &str) -> Result<()> {
        self.set_status(
            order_ref,
            OrderStatus::Failed {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Number of orders ever submitted to this rail
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// The original request behind an order
    pub async fn order_request(&self, order_ref: &str) -> Option<OrderRequest> {
        self.orders
            .read()
            .await
            .get(order_ref)
            .map(|o| o.request.clone())
    }

    async fn set_status(&self, order_ref: &str, status: OrderStatus) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_ref)
            .ok_or_else(|| RailError::OrderNotFound(order_ref.to_string()))?;
        order.status = status;
        Ok(())
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn rate_for(&self, from_asset: &Asset, to_asset: &Asset) -> Decimal {
        self.rates
            .get(&(from_asset.clone(), to_asset.clone()))
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    fn apply_script(&self, order: &mut MockOrder) {
        if order.status.is_terminal() {
            return;
        }
        if let Some((threshold, reason)) = &self.fail_after_polls {
            if order.polls >= *threshold {
                order.status = OrderStatus::Failed {
                    reason: reason.clone(),
                };
                return;
            }
        }
        if let Some((threshold, to_amount)) = self.fill_after_polls {
            if order.polls >= threshold {
                order.status = OrderStatus::Filled { to_amount };
                return;
            }
        }
        if let Some(threshold) = self.match_after_polls {
            if order.polls >= threshold && order.status == OrderStatus::Working {
                order.status = OrderStatus::Matched;
            }
        }
    }
}

#[async_trait]
impl SettlementAdapter for MockRailAdapter {
    fn route(&self) -> SwapRoute {
        self.route
    }

    fn supports(&self, from_asset: &Asset, to_asset: &Asset) -> bool {
        if from_asset == to_asset {
            return false;
        }
        match &self.pairs {
            Some(pairs) => pairs
                .iter()
                .any(|(f, t)| f == from_asset && t == to_asset),
            None => true,
        }
    }

    async fn quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        self.simulate_latency().await;
        if !self.supports(from_asset, to_asset) {
            return Err(RailError::QuoteUnavailable(format!(
                "{}/{} not supported",
                from_asset, to_asset
            )));
        }
        let now = Utc::now();
        Ok(RailQuote {
            route: self.route,
            from_asset: from_asset.clone(),
            from_amount,
            to_asset: to_asset.clone(),
            to_amount: from_amount * self.rate_for(from_asset, to_asset),
            quoted_at: now,
            expires_at: now + Duration::seconds(60),
        })
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.simulate_latency().await;
        if self.success_rate < 1.0 {
            let roll: f64 = rand::thread_rng().gen();
            if roll > self.success_rate {
                return Err(RailError::Rejected("mock venue rejected order".to_string()));
            }
        }
        let order_ref = format!(
            "mock-{}-{}",
            self.route,
            self.seq.fetch_add(1, Ordering::Relaxed) + 1
        );
        let status = match self.auto_fill {
            Some(to_amount) => OrderStatus::Filled { to_amount },
            None => OrderStatus::Working,
        };
        self.orders.write().await.insert(
            order_ref.clone(),
            MockOrder {
                request: request.clone(),
                status,
                polls: 0,
            },
        );
        Ok(OrderAck {
            order_ref,
            accepted_at: Utc::now(),
        })
    }

    async fn poll_status(&self, order_ref: &str) -> Result<OrderStatus> {
        self.simulate_latency().await;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_ref)
            .ok_or_else(|| RailError::OrderNotFound(order_ref.to_string()))?;
        order.polls += 1;
        self.apply_script(order);
        Ok(order.status.clone())
    }

    async fn cancel(&self, order_ref: &str) -> Result<()> {
        self.simulate_latency().await;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_ref)
            .ok_or_else(|| RailError::OrderNotFound(order_ref.to_string()))?;
        if order.status != OrderStatus::Working {
            return Err(RailError::Rejected(format!(
                "order {} is not open",
                order_ref
            )));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }
}
