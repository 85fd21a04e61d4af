//! Wire types shared by all settlement rails

use chrono::{DateTime, Utc};
use custody_ledger::{Asset, SwapRoute};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order handed to a rail for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Swap this order settles
    pub swap_id: Uuid,

    /// Asset sold
    pub from_asset: Asset,

    /// Amount sold
    pub from_amount: Decimal,

    /// Asset bought
    pub to_asset: Asset,

    /// Minimum acceptable output; rails must not fill below this
    pub min_to_amount: Decimal,

    /// Give up after this instant (rails that support deadlines)
    pub deadline: Option<DateTime<Utc>>,
}

/// Acknowledgement that a rail accepted an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Rail-side order reference, used for all later polling
    pub order_ref: String,

    /// When the rail accepted the order
    pub accepted_at: DateTime<Utc>,
}

/// Observed state of a rail-side order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, not yet matched/confirmed
    Working,

    /// Counterparty found, settlement in progress (P2P only)
    Matched,

    /// Settled; this much of the to-asset arrived
    Filled {
        /// Actual output delivered
        to_amount: Decimal,
    },

    /// Order died on the rail side
    Failed {
        /// What the rail reported
        reason: String,
    },

    /// Cancelled before execution
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled { .. } | OrderStatus::Failed { .. } | OrderStatus::Cancelled
        )
    }
}

/// Executable quote from one rail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailQuote {
    /// Rail that quoted
    pub route: SwapRoute,

    /// Asset sold
    pub from_asset: Asset,

    /// Amount quoted for
    pub from_amount: Decimal,

    /// Asset bought
    pub to_asset: Asset,

    /// Output at this quote
    pub to_amount: Decimal,

    /// When the quote was made
    pub quoted_at: DateTime<Utc>,

    /// Quote is dead after this instant
    pub expires_at: DateTime<Utc>,
}

impl RailQuote {
    /// True once the quote has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::Working.is_terminal());
        assert!(!OrderStatus::Matched.is_terminal());
        assert!(OrderStatus::Filled {
            to_amount: Decimal::ONE
        }
        .is_terminal());
        assert!(OrderStatus::Failed {
            reason: "x".to_string()
        }
        .is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_quote_expiry() {
        let mut quote = RailQuote {
            route: SwapRoute::Dex,
            from_asset: Asset::new("ETH"),
            from_amount: Decimal::ONE,
            to_asset: Asset::new("USDT"),
            to_amount: Decimal::from(3500),
            quoted_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        assert!(!quote.is_expired());

        quote.expires_at = Utc::now() - Duration::seconds(1);
        assert!(quote.is_expired());
    }
}
