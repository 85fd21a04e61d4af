//! The rail abstraction
//!
//! Every settlement venue, whether a P2P matching desk, a cross-chain
//! protocol or a DEX aggregator, is driven through the same four-operation
//! surface: quote, submit, poll, cancel. The router never talks to a venue
//! directly.

use async_trait::async_trait;
use custody_ledger::{Asset, SwapRoute};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RailError, Result};
use crate::types::{OrderAck, OrderRequest, OrderStatus, RailQuote};

/// One settlement rail
#[async_trait]
pub trait SettlementAdapter: Send + Sync {
    /// Which rail this is
    fn route(&self) -> SwapRoute;

    /// Whether the rail can settle this pair at all
    fn supports(&self, from_asset: &Asset, to_asset: &Asset) -> bool;

    /// Executable quote for the pair and size
    async fn quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote>;

    /// Hand an order to the rail; the returned reference drives polling
    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Current state of a previously submitted order
    async fn poll_status(&self, order_ref: &str) -> Result<OrderStatus>;

    /// Best-effort cancellation; rails that cannot cancel return
    /// [`RailError::Unsupported`]
    async fn cancel(&self, order_ref: &str) -> Result<()>;
}

/// Fixed set of rails, resolved by route
///
/// Built once at startup; registration is not thread-safe and happens
/// before the registry is shared.
pub struct AdapterRegistry {
    adapters: HashMap<SwapRoute, Arc<dyn SettlementAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register a rail under its own route; replaces any previous one
    pub fn register(&mut self, adapter: Arc<dyn SettlementAdapter>) {
        let route = adapter.route();
        self.adapters.insert(route, adapter);
        tracing::info!(route = %route, "Settlement rail registered");
    }

    /// Look up a rail by route
    pub fn get(&self, route: SwapRoute) -> Result<Arc<dyn SettlementAdapter>> {
        self.adapters.get(&route).cloned().ok_or_else(|| {
            RailError::Unsupported {
                route,
                detail: "no adapter registered".to_string(),
            }
        })
    }

    /// Rails that can settle this pair, in no particular order
    pub fn supporting(&self, from_asset: &Asset, to_asset: &Asset) -> Vec<Arc<dyn SettlementAdapter>> {
        self.adapters
            .values()
            .filter(|a| a.supports(from_asset, to_asset))
            .cloned()
            .collect()
    }

    /// All registered routes
    pub fn routes(&self) -> Vec<SwapRoute> {
        self.adapters.keys().copied().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
