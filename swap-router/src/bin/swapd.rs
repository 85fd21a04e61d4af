//! swapd: hosts the custody ledger, the settlement rails, and the
//! recovery sweep. The wired rails are the mock venues; a deployment
//! swaps them for real desk, protocol, and DEX integrations.

use custody_ledger::{storage::Storage, BalanceLedger, Metrics, SwapRoute};
use rust_decimal::Decimal;
use settlement_rails::{AdapterRegistry, AssetClassTable, MockRailAdapter};
use std::sync::Arc;
use swap_router::{RecoverySweep, RouterConfig, SwapRouter};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("swapd starting...");

    // Load configuration
    let ledger_config = custody_ledger::Config::from_env()?;
    let router_config = match std::env::var("SWAPD_CONFIG") {
        Ok(path) => RouterConfig::from_file(path)?,
        Err(_) => RouterConfig::from_env()?,
    };

    info!(
        data_dir = %ledger_config.data_dir.display(),
        p2p_wait_secs = router_config.p2p.wait_secs,
        sweep_interval_secs = router_config.sweep.interval_secs,
        "Configuration loaded"
    );

    // Open the ledger
    let storage = Arc::new(Storage::open(&ledger_config)?);
    let ledger = Arc::new(BalanceLedger::new(
        storage,
        &ledger_config,
        Metrics::new()?,
    ));

    let stats = ledger.storage_stats()?;
    info!(
        accounts = stats.total_accounts,
        swaps = stats.total_swaps,
        "Ledger opened"
    );

    // Register rails; scripted fills stand in for venue settlement
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(
        MockRailAdapter::new(SwapRoute::P2p)
            .with_rate("BTC", "ETH", Decimal::from(20))
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_match_after_polls(3)
            .with_fill_after_polls(6, Decimal::from(20)),
    ));
    registry.register(Arc::new(
        MockRailAdapter::new(SwapRoute::Protocol)
            .with_rate("BTC", "ETH", Decimal::new(199, 1))
            .with_rate("BTC", "LTC", Decimal::from(750))
            .with_fill_after_polls(4, Decimal::new(199, 1)),
    ));
    registry.register(Arc::new(
        MockRailAdapter::new(SwapRoute::Dex)
            .with_rate("ETH", "USDT", Decimal::from(3480))
            .with_rate("USDT", "ETH", Decimal::new(285, 6))
            .with_fill_after_polls(2, Decimal::from(3480)),
    ));
    let registry = Arc::new(registry);

    // Router and recovery sweep
    let router = Arc::new(SwapRouter::new(
        ledger.clone(),
        registry,
        AssetClassTable::new(),
        router_config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = RecoverySweep::new(ledger.clone(), router, router_config.sweep.clone());
    let sweep_handle = tokio::spawn(sweep.run(shutdown_rx));

    info!("swapd initialized successfully");

    // Wait for shutdown signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // Graceful shutdown: stop the sweep, then let storage close on drop
    info!("Shutting down swapd...");
    let _ = shutdown_tx.send(true);
    let _ = sweep_handle.await;

    info!("swapd stopped");
    Ok(())
}
