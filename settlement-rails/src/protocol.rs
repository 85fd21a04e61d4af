//! Cross-chain protocol rail
//!
//! Native protocol swaps move value between chains without a wrapped
//! intermediary. The protocol observes our inbound transfer, runs the swap
//! against its pools and emits an outbound transfer. Once the inbound is
//! broadcast there is nothing to cancel; on pool-side failure the protocol
//! refunds the inbound and we surface that as a failed order.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use custody_ledger::{Asset, SwapRoute};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::SettlementAdapter;
use crate::error::{RailError, Result};
use crate::types::{OrderAck, OrderRequest, OrderStatus, RailQuote};

/// Pool quotes go stale quickly
const QUOTE_TTL_SECS: i64 = 15;

/// Protocol-side swap lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProtocolSwapState {
    /// Inbound transfer broadcast, not yet observed by the protocol
    InboundPending,
    /// Inbound observed, swap executing against the pools
    Swapping,
    /// Outbound transfer emitted
    Completed {
        /// Amount the outbound delivered
        to_amount: Decimal,
    },
    /// Protocol refunded the inbound instead of swapping
    Refunded {
        /// Protocol-side refund reason
        reason: String,
    },
}

/// Wire transport to the protocol
#[async_trait]
pub trait ProtocolGateway: Send + Sync {
    /// Expected output for a swap of this size against current pool depth
    async fn quote_swap(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<Decimal>;

    /// Broadcast the inbound transfer with the swap memo, returning the
    /// protocol's tracking reference
    async fn initiate_swap(&self, request: &OrderRequest) -> Result<String>;

    /// Current protocol-side state of a swap
    async fn swap_state(&self, protocol_ref: &str) -> Result<ProtocolSwapState>;
}

/// Protocol rail over a gateway transport
pub struct ProtocolAdapter {
    gateway: Arc<dyn ProtocolGateway>,
    native_assets: HashSet<Asset>,
}

impl ProtocolAdapter {
    /// Build the rail; only pairs where both legs are protocol-native are
    /// supported
    pub fn new(gateway: Arc<dyn ProtocolGateway>, native_assets: Vec<Asset>) -> Self {
        Self {
            gateway,
            native_assets: native_assets.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SettlementAdapter for ProtocolAdapter {
    fn route(&self) -> SwapRoute {
        SwapRoute::Protocol
    }

    fn supports(&self, from_asset: &Asset, to_asset: &Asset) -> bool {
        from_asset != to_asset
            && self.native_assets.contains(from_asset)
            && self.native_assets.contains(to_asset)
    }

    async fn quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        if !self.supports(from_asset, to_asset) {
            return Err(RailError::QuoteUnavailable(format!(
                "{}/{} is not protocol-native",
                from_asset, to_asset
            )));
        }
        let to_amount = self
            .gateway
            .quote_swap(from_asset, from_amount, to_asset)
            .await?;
        let now = Utc::now();
        Ok(RailQuote {
            route: SwapRoute::Protocol,
            from_asset: from_asset.clone(),
            from_amount,
            to_asset: to_asset.clone(),
            to_amount,
            quoted_at: now,
            expires_at: now + Duration::seconds(QUOTE_TTL_SECS),
        })
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck> {
        let order_ref = self.gateway.initiate_swap(request).await?;
        tracing::info!(
            swap_id = %request.swap_id,
            order_ref = %order_ref,
            "Protocol swap initiated"
        );
        Ok(OrderAck {
            order_ref,
            accepted_at: Utc::now(),
        })
    }

    async fn poll_status(&self, order_ref: &str) -> Result<OrderStatus> {
        let state = self.gateway.swap_state(order_ref).await?;
        Ok(match state {
            ProtocolSwapState::InboundPending | ProtocolSwapState::Swapping => {
                OrderStatus::Working
            }
            ProtocolSwapState::Completed { to_amount } => OrderStatus::Filled { to_amount },
            ProtocolSwapState::Refunded { reason } => OrderStatus::Failed {
                reason: format!("protocol refunded inbound: {}", reason),
            },
        })
    }

    async fn cancel(&self, _order_ref: &str) -> Result<()> {
        Err(RailError::Unsupported {
            route: SwapRoute::Protocol,
            detail: "protocol swaps are irrevocable once the inbound is broadcast".to_string(),
        })
    }
}
