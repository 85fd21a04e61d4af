//! On-chain DEX aggregator rail
//!
//! Two seams: the aggregator API that prices a swap and builds router
//! calldata, and the broadcaster that signs and lands the transaction.
//! The slippage floor travels inside the calldata, so a fill below
//! `min_to_amount` reverts on-chain instead of settling short.

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

/// Aggregator quotes chase the mempool, keep them short-lived
const QUOTE_TTL_SECS: i64 = 10;

/// Router transaction built by the aggregator, ready to sign and send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexSwapTx {
    /// Router contract the transaction calls
    pub to_contract: String,
    /// ABI-encoded swap call
    pub calldata: String,
    /// Revert floor embedded in the call
    pub min_out: Decimal,
}

/// Aggregator API seam
#[async_trait]
pub trait DexApi: Send + Sync {
    /// Expected output for a swap of this size across the venue's pools
    async fn quote_swap(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<Decimal>;

    /// Build the router transaction for an order
    async fn build_swap_tx(&self, request: &OrderRequest) -> Result<DexSwapTx>;
}

/// Transaction submission seam
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Sign and broadcast, returning the transaction hash
    async fn send_tx(&self, tx: &DexSwapTx) -> Result<String>;

    /// Chain-side state of a broadcast transaction
    async fn tx_status(&self, tx_hash: &str) -> Result<DexTxState>;
}

/// Chain-side lifecycle of the swap transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DexTxState {
    /// In the mempool or below the confirmation threshold
    Pending,
    /// Mined and settled
    Confirmed {
        /// Output amount decoded from the swap event
        amount_out: Decimal,
    },
    /// Mined but reverted, no value moved
    Reverted {
        /// Decoded revert reason when available
        reason: String,
    },
}

/// DEX rail composing an aggregator and a broadcaster
pub struct DexAdapter {
    api: Arc<dyn DexApi>,
    broadcaster: Arc<dyn Broadcaster>,
    tradable: HashSet<Asset>,
}

impl DexAdapter {
    /// Build the rail; `tradable` lists assets with pools on the venue
    pub fn new(
        api: Arc<dyn DexApi>,
        broadcaster: Arc<dyn Broadcaster>,
        tradable: Vec<Asset>,
    ) -> Self {
        Self {
            api,
            broadcaster,
            tradable: tradable.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SettlementAdapter for DexAdapter {
    fn route(&self) -> SwapRoute {
        SwapRoute::Dex
    }

    fn supports(&self, from_asset: &Asset, to_asset: &Asset) -> bool {
        from_asset != to_asset
            && self.tradable.contains(from_asset)
            && self.tradable.contains(to_asset)
    }

    async fn quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        if !self.supports(from_asset, to_asset) {
            return Err(RailError::QuoteUnavailable(format!(
                "{}/{} has no pool on this venue",
                from_asset, to_asset
            )));
        }
        let to_amount = self
            .api
            .quote_swap(from_asset, from_amount, to_asset)
            .await?;
        let now = Utc::now();
        Ok(RailQuote {
            route: SwapRoute::Dex,
            from_asset: from_asset.clone(),
            from_amount,
            to_asset: to_asset.clone(),
            to_amount,
            quoted_at: now,
            expires_at: now + Duration::seconds(QUOTE_TTL_SECS),
        })
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck> {
        let tx = self.api.build_swap_tx(request).await?;
        let tx_hash = self.broadcaster.send_tx(&tx).await?;
        tracing::info!(
            swap_id = %request.swap_id,
            tx_hash = %tx_hash,
            to_contract = %tx.to_contract,
            min_out = %tx.min_out,
            "Swap transaction broadcast"
        );
        Ok(OrderAck {
            order_ref: tx_hash,
            accepted_at: Utc::now(),
        })
    }

    async fn poll_status(&self, order_ref: &str) -> Result<OrderStatus> {
        let state = self.broadcaster.tx_status(order_ref).await?;
        Ok(match state {
            DexTxState::Pending => OrderStatus::Working,
            DexTxState::Confirmed { amount_out } => OrderStatus::Filled {
                to_amount: amount_out,
            },
            DexTxState::Reverted { reason } => OrderStatus::Failed {
                reason: format!("swap reverted: {}", reason),
            },
        })
    }

    async fn cancel(&self, _order_ref: &str) -> Result<()> {
        Err(RailError::Unsupported {
            route: SwapRoute::Dex,
            detail: "cannot recall a broadcast transaction".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubApi;

    #[async_trait]
    impl DexApi for StubApi {
        async fn quote_swap(
            &self,
            _from_asset: &Asset,
            from_amount: Decimal,
            _to_asset: &Asset,
        ) -> Result<Decimal> {
            Ok(from_amount * Decimal::from(1800))
        }

        async fn build_swap_tx(&self, request: &OrderRequest) -> Result<DexSwapTx> {
            Ok(DexSwapTx {
                to_contract: "0xrouter".to_string(),
                calldata: format!("0xswap{}", request.swap_id.simple()),
                min_out: request.min_to_amount,
            })
        }
    }

    struct StubBroadcaster {
        state: Mutex<DexTxState>,
    }

    #[async_trait]
    impl Broadcaster for StubBroadcaster {
        async fn send_tx(&self, tx: &DexSwapTx) -> Result<String> {
            Ok(format!("0xhash{}", tx.calldata.len()))
        }

        async fn tx_status(&self, _tx_hash: &str) -> Result<DexTxState> {
            Ok(self.state.lock().unwrap().clone())
        }
    }

    fn adapter(state: DexTxState) -> DexAdapter {
        DexAdapter::new(
            Arc::new(StubApi),
            Arc::new(StubBroadcaster {
                state: Mutex::new(state),
            }),
            vec![Asset::new("ETH"), Asset::new("USDC"), Asset::new("WBTC")],
        )
    }

    #[tokio::test]
    async fn test_submit_builds_and_broadcasts() {
        let adapter = adapter(DexTxState::Pending);
        let ack = adapter
            .submit(&OrderRequest {
                swap_id: uuid::Uuid::now_v7(),
                from_asset: Asset::new("ETH"),
                from_amount: Decimal::from(2),
                to_asset: Asset::new("USDC"),
                min_to_amount: Decimal::from(3500),
                deadline: None,
            })
            .await
            .unwrap();
        assert!(ack.order_ref.starts_with("0xhash"));
        assert_eq!(
            adapter.poll_status(&ack.order_ref).await.unwrap(),
            OrderStatus::Working
        );
    }

    #[tokio::test]
    async fn test_revert_maps_to_failure() {
        let adapter = adapter(DexTxState::Reverted {
            reason: "INSUFFICIENT_OUTPUT_AMOUNT".to_string(),
        });
        match adapter.poll_status("0xhash1").await.unwrap() {
            OrderStatus::Failed { reason } => {
                assert!(reason.contains("INSUFFICIENT_OUTPUT_AMOUNT"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirmed_maps_to_filled() {
        let adapter = adapter(DexTxState::Confirmed {
            amount_out: Decimal::from(3610),
        });
        assert_eq!(
            adapter.poll_status("0xhash1").await.unwrap(),
            OrderStatus::Filled {
                to_amount: Decimal::from(3610),
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_is_unsupported() {
        let adapter = adapter(DexTxState::Pending);
        assert!(matches!(
            adapter.cancel("0xhash1").await.unwrap_err(),
            RailError::Unsupported {
                route: SwapRoute::Dex,
                ..
            }
        ));
    }
}
