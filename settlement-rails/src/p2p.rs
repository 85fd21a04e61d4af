//! Peer-to-peer matching desk rail
//!
//! The desk crosses opposite-direction swaps against each other, so an
//! order can sit open for a while before a counterparty shows up. The
//! adapter reports that waiting period as [`OrderStatus::Working`]; the
//! router decides how long it is willing to wait.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use custody_ledger::{Asset, SwapRoute};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapter::SettlementAdapter;
use crate::error::{RailError, Result};
use crate::quotes::RateSource;
use crate::types::{OrderAck, OrderRequest, OrderStatus, RailQuote};

/// How long a desk quote stays executable
const QUOTE_TTL_SECS: i64 = 30;

/// Order lifecycle as the desk reports it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MatchState {
    /// Posted to the book, no counterparty yet
    Open,
    /// Counterparty found, escrow being arranged
    Matched,
    /// Both legs locked, settlement in progress
    Settling,
    /// Crossed and settled
    Settled {
        /// Amount the desk delivered
        to_amount: Decimal,
    },
    /// The desk abandoned the order
    Failed {
        /// Desk-side failure reason
        reason: String,
    },
    /// Pulled from the book before a match
    Cancelled,
}

/// Wire transport to the matching desk
#[async_trait]
pub trait P2pDesk: Send + Sync {
    /// Post an order to the book, returning the desk's reference
    async fn post_order(&self, request: &OrderRequest) -> Result<String>;

    /// Current desk-side state of an order
    async fn order_state(&self, order_ref: &str) -> Result<MatchState>;

    /// Pull an order from the book
    async fn cancel_order(&self, order_ref: &str) -> Result<()>;
}

/// P2P rail over a matching desk transport
pub struct P2pAdapter {
    desk: Arc<dyn P2pDesk>,
    rates: Arc<dyn RateSource>,
    fee_bps: u32,
}

impl P2pAdapter {
    /// Build the rail from a desk transport and an indicative rate source
    pub fn new(desk: Arc<dyn P2pDesk>, rates: Arc<dyn RateSource>, fee_bps: u32) -> Self {
        Self {
            desk,
            rates,
            fee_bps,
        }
    }

    fn net_multiplier(&self) -> Decimal {
        Decimal::ONE - Decimal::from(self.fee_bps) / Decimal::from(10_000u32)
    }
}

#[async_trait]
impl SettlementAdapter for P2pAdapter {
    fn route(&self) -> SwapRoute {
        SwapRoute::P2p
    }

    fn supports(&self, from_asset: &Asset, to_asset: &Asset) -> bool {
        self.rates.rate(from_asset, to_asset).is_some()
    }

    async fn quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        let rate = self.rates.rate(from_asset, to_asset).ok_or_else(|| {
            RailError::QuoteUnavailable(format!("no rate for {}/{}", from_asset, to_asset))
        })?;
        let now = Utc::now();
        Ok(RailQuote {
            route: SwapRoute::P2p,
            from_asset: from_asset.clone(),
            from_amount,
            to_asset: to_asset.clone(),
            to_amount: from_amount * rate * self.net_multiplier(),
            quoted_at: now,
            expires_at: now + Duration::seconds(QUOTE_TTL_SECS),
        })
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderAck> {
        let order_ref = self.desk.post_order(request).await?;
        tracing::info!(
            swap_id = %request.swap_id,
            order_ref = %order_ref,
            "Order posted to matching desk"
        );
        Ok(OrderAck {
            order_ref,
            accepted_at: Utc::now(),
        })
    }

    async fn poll_status(&self, order_ref: &str) -> Result<OrderStatus> {
        let state = self.desk.order_state(order_ref).await?;
        Ok(match state {
            MatchState::Open => OrderStatus::Working,
            MatchState::Matched | MatchState::Settling => OrderStatus::Matched,
            MatchState::Settled { to_amount } => OrderStatus::Filled { to_amount },
            MatchState::Failed { reason } => OrderStatus::Failed { reason },
            MatchState::Cancelled => OrderStatus::Cancelled,
        })
    }

    async fn cancel(&self, order_ref: &str) -> Result<()> {
        self.desk.cancel_order(order_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::StaticRateSource;
    use std::sync::Mutex;

    struct StubDesk {
        state: Mutex<MatchState>,
    }

    impl StubDesk {
        fn with_state(state: MatchState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }
    }

    #[async_trait]
    impl P2pDesk for StubDesk {
        async fn post_order(&self, request: &OrderRequest) -> Result<String> {
            Ok(format!("desk-{}", request.swap_id))
        }

        async fn order_state(&self, _order_ref: &str) -> Result<MatchState> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn cancel_order(&self, _order_ref: &str) -> Result<()> {
            *self.state.lock().unwrap() = MatchState::Cancelled;
            Ok(())
        }
    }

    fn rates() -> Arc<StaticRateSource> {
        Arc::new(StaticRateSource::new().with_rate("BTC", "ETH", Decimal::from(20)))
    }

    #[tokio::test]
    async fn test_quote_applies_fee_haircut() {
        let adapter = P2pAdapter::new(
            Arc::new(StubDesk::with_state(MatchState::Open)),
            rates(),
            25,
        );
        let quote = adapter
            .quote(&Asset::new("BTC"), Decimal::new(15, 1), &Asset::new("ETH"))
            .await
            .unwrap();

        // 1.5 * 20 less 25 bps
        assert_eq!(quote.to_amount, Decimal::new(299250, 4));
        assert!(!quote.is_expired());

        let err = adapter
            .quote(&Asset::new("DOGE"), Decimal::ONE, &Asset::new("ETH"))
            .await
            .unwrap_err();
        assert!(matches!(err, RailError::QuoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_match_states_map_to_order_status() {
        let cases = vec![
            (MatchState::Open, OrderStatus::Working),
            (MatchState::Matched, OrderStatus::Matched),
            (MatchState::Settling, OrderStatus::Matched),
            (
                MatchState::Settled {
                    to_amount: Decimal::from(30),
                },
                OrderStatus::Filled {
                    to_amount: Decimal::from(30),
                },
            ),
            (
                MatchState::Failed {
                    reason: "counterparty defaulted".to_string(),
                },
                OrderStatus::Failed {
                    reason: "counterparty defaulted".to_string(),
                },
            ),
            (MatchState::Cancelled, OrderStatus::Cancelled),
        ];
        for (state, expected) in cases {
            let adapter =
                P2pAdapter::new(Arc::new(StubDesk::with_state(state)), rates(), 0);
            assert_eq!(adapter.poll_status("desk-1").await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_cancel_pulls_order() {
        let desk = Arc::new(StubDesk::with_state(MatchState::Open));
        let adapter = P2pAdapter::new(desk, rates(), 0);
        let ack = adapter
            .submit(&OrderRequest {
                swap_id: uuid::Uuid::now_v7(),
                from_asset: Asset::new("BTC"),
                from_amount: Decimal::ONE,
                to_asset: Asset::new("ETH"),
                min_to_amount: Decimal::from(19),
                deadline: None,
            })
            .await
            .unwrap();

        adapter.cancel(&ack.order_ref).await.unwrap();
        assert_eq!(
            adapter.poll_status(&ack.order_ref).await.unwrap(),
            OrderStatus::Cancelled
        );
    }
}
