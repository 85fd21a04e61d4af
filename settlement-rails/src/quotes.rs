//! Indicative rates and cross-rail quoting
//!
//! [`RateSource`] is a synchronous read because implementations sit in
//! front of a cache that a feed refreshes in the background. The
//! [`QuoteAggregator`] fans a request out to every rail that supports the
//! pair and keeps the best executable quote.

use custody_ledger::Asset;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::adapter::{AdapterRegistry, SettlementAdapter};
use crate::error::{RailError, Result};
use crate::types::RailQuote;

/// Indicative spot rates, directional
pub trait RateSource: Send + Sync {
    /// Units of `to_asset` per unit of `from_asset`, if the pair is priced
    fn rate(&self, from_asset: &Asset, to_asset: &Asset) -> Option<Decimal>;
}

/// Fixed rate table, mostly for tests and local runs
#[derive(Default)]
pub struct StaticRateSource {
    rates: HashMap<(Asset, Asset), Decimal>,
}

impl StaticRateSource {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directional rate
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates.insert((Asset::new(from), Asset::new(to)), rate);
        self
    }
}

impl RateSource for StaticRateSource {
    fn rate(&self, from_asset: &Asset, to_asset: &Asset) -> Option<Decimal> {
        self.rates
            .get(&(from_asset.clone(), to_asset.clone()))
            .copied()
    }
}

/// Fans quote requests out across rails and picks the best fill
pub struct QuoteAggregator {
    registry: Arc<AdapterRegistry>,
    quote_timeout: Duration,
}

impl QuoteAggregator {
    /// Build over a registry; `quote_timeout` bounds each rail's answer
    pub fn new(registry: Arc<AdapterRegistry>, quote_timeout: Duration) -> Self {
        Self {
            registry,
            quote_timeout,
        }
    }

    /// Every quote the supporting rails produced within the timeout
    pub async fn all_quotes(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Vec<RailQuote> {
        let adapters = self.registry.supporting(from_asset, to_asset);
        let quote_futures: Vec<_> = adapters
            .iter()
            .map(|adapter| self.quote_one(adapter.clone(), from_asset, from_amount, to_asset))
            .collect();

        join_all(quote_futures)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Best quote by output amount across all supporting rails
    pub async fn best_quote(
        &self,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Result<RailQuote> {
        let quotes = self.all_quotes(from_asset, from_amount, to_asset).await;
        quotes
            .into_iter()
            .max_by(|a, b| a.to_amount.cmp(&b.to_amount))
            .ok_or_else(|| {
                RailError::QuoteUnavailable(format!(
                    "no rail quoted {}/{}",
                    from_asset, to_asset
                ))
            })
    }

    async fn quote_one(
        &self,
        adapter: Arc<dyn SettlementAdapter>,
        from_asset: &Asset,
        from_amount: Decimal,
        to_asset: &Asset,
    ) -> Option<RailQuote> {
        let route = adapter.route();
        match timeout(
            self.quote_timeout,
            adapter.quote(from_asset, from_amount, to_asset),
        )
        .await
        {
            Ok(Ok(quote)) => {
                tracing::debug!(route = %route, to_amount = %quote.to_amount, "Rail quoted");
                Some(quote)
            }
            Ok(Err(e)) => {
                tracing::warn!(route = %route, error = %e, "Rail quote failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    route = %route,
                    timeout_ms = self.quote_timeout.as_millis() as u64,
                    "Rail quote timed out"
                );
                None
            }
        }
    }
}
