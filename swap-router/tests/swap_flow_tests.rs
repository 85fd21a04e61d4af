//! End-to-end swap flows over the mock rails
//!
//! Every test runs on the paused clock: the P2P wait, poll intervals and
//! settlement timeouts elapse on virtual time, so the long scenarios run
//! in milliseconds.

use custody_ledger::{
    storage::Storage, AccountId, Asset, BalanceLedger, Chain, Config, DepositEvent,
    DepositProcessor, EventSource, Metrics, SwapPhase, SwapRoute, TxRef,
};
use rust_decimal::Decimal;
use settlement_rails::{AdapterRegistry, AssetClassTable, MockRailAdapter};
use std::sync::Arc;
use std::time::Duration;
use swap_router::{RecoverySweep, RouterConfig, RouterError, SwapRouter};
use tempfile::TempDir;

fn open_ledger() -> (Arc<BalanceLedger>, Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    let storage = Arc::new(Storage::open(&config).unwrap());
    let ledger = Arc::new(BalanceLedger::new(
        storage,
        &config,
        Metrics::new().unwrap(),
    ));
    (ledger, config, temp_dir)
}

/// Credit a balance through the deposit pipeline
async fn fund(
    ledger: &Arc<BalanceLedger>,
    config: &Config,
    account: AccountId,
    chain: &str,
    address: &str,
    asset: &str,
    amount: Decimal,
) {
    let processor = DepositProcessor::new(ledger.clone(), config.clone());
    processor
        .register_address(account, Chain::new(chain), address, Asset::new(asset))
        .unwrap();
    processor
        .process(DepositEvent {
            source: EventSource::Webhook,
            tx: TxRef::new(Chain::new(chain), format!("0xfund-{}", address), 0),
            to_address: address.to_string(),
            asset: Asset::new(asset),
            amount,
            confirmations: 30,
            raw: serde_json::json!({}),
        })
        .await
        .unwrap();
}

/// Short waits so scenarios resolve in a handful of virtual seconds
fn fast_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.p2p.wait_secs = 5;
    config.p2p.poll_interval_ms = 200;
    config.fallback.confirm_wait_secs = 30;
    config.fallback.poll_interval_ms = 200;
    config
}

fn build_router(
    ledger: &Arc<BalanceLedger>,
    registry: AdapterRegistry,
    config: RouterConfig,
) -> Arc<SwapRouter> {
    Arc::new(SwapRouter::new(
        ledger.clone(),
        Arc::new(registry),
        AssetClassTable::new(),
        config,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_p2p_match_fills_and_commits() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(1);
    fund(&ledger, &config, account, "ETH", "0xa1", "ETH", Decimal::from(2)).await;

    let p2p = Arc::new(
        MockRailAdapter::new(SwapRoute::P2p)
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_match_after_polls(1)
            .with_fill_after_polls(2, Decimal::from(5250)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(p2p.clone());
    let router = build_router(&ledger, registry, fast_config());

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();
    assert_eq!(swap.expected_to_amount, Decimal::from(5250));
    assert_eq!(swap.min_to_amount, Decimal::new(51975, 1));

    let done = router.execute(swap.id).await.unwrap();

    assert_eq!(done.phase, SwapPhase::Completed);
    assert_eq!(done.route, Some(SwapRoute::P2p));
    assert_eq!(done.actual_to_amount, Some(Decimal::from(5250)));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::new(5, 1));
    assert_eq!(eth.locked, Decimal::ZERO);
    let usdt = ledger.get_balance(account, &Asset::new("USDT")).unwrap();
    assert_eq!(usdt.amount, Decimal::from(5250));

    // Terminal swaps cannot be driven again
    let err = router.execute(swap.id).await.unwrap_err();
    assert!(matches!(err, RouterError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn test_p2p_timeout_falls_back_to_dex() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(2);
    fund(&ledger, &config, account, "ETH", "0xa2", "ETH", Decimal::from(2)).await;

    // Desk never matches; the DEX fills on the first status poll
    let p2p = Arc::new(
        MockRailAdapter::new(SwapRoute::P2p).with_rate("ETH", "USDT", Decimal::from(3400)),
    );
    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex)
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_fill_after_polls(1, Decimal::from(5250)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(p2p.clone());
    registry.register(dex.clone());
    let router = build_router(&ledger, registry, fast_config());

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();
    let done = router.execute(swap.id).await.unwrap();

    assert_eq!(done.phase, SwapPhase::Completed);
    assert_eq!(done.route, Some(SwapRoute::Dex));
    assert_eq!(done.actual_to_amount, Some(Decimal::from(5250)));

    // The counter-order was posted and pulled at the deadline
    assert_eq!(p2p.order_count().await, 1);
    assert_eq!(dex.order_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_p2p_failure_after_match_refunds_without_fallback() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(3);
    fund(&ledger, &config, account, "ETH", "0xa3", "ETH", Decimal::from(2)).await;

    let p2p = Arc::new(
        MockRailAdapter::new(SwapRoute::P2p)
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_match_after_polls(1)
            .with_fail_after_polls(2, "counterparty walked"),
    );
    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(p2p.clone());
    registry.register(dex.clone());
    let router = build_router(&ledger, registry, fast_config());

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();
    let done = router.execute(swap.id).await.unwrap();

    // A failure after the match may have moved funds; never replay it
    // through another rail
    assert_eq!(done.phase, SwapPhase::Failed);
    assert!(done
        .fail_reason
        .as_deref()
        .unwrap()
        .contains("counterparty walked"));
    assert_eq!(dex.order_count().await, 0);

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::from(2));
    assert_eq!(eth.locked, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_dex_failure_refunds_reservation() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(4);
    fund(&ledger, &config, account, "ETH", "0xa4", "ETH", Decimal::from(2)).await;

    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex)
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_fail_after_polls(1, "swap reverted: slippage exceeded"),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(dex.clone());
    let mut router_config = fast_config();
    router_config.p2p.enabled = false;
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();
    let done = router.execute(swap.id).await.unwrap();

    assert_eq!(done.phase, SwapPhase::Failed);
    assert!(done
        .fail_reason
        .as_deref()
        .unwrap()
        .contains("dex settlement failed"));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::from(2));
    assert_eq!(eth.locked, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_native_source_falls_back_to_protocol_rail() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(5);
    fund(
        &ledger,
        &config,
        account,
        "BTC",
        "bc1qa5",
        "BTC",
        Decimal::from(2),
    )
    .await;

    // Both fallback rails serve BTC/LTC and the DEX even quotes better;
    // the source class still decides the rail
    let protocol = Arc::new(
        MockRailAdapter::new(SwapRoute::Protocol)
            .with_rate("BTC", "LTC", Decimal::from(750))
            .with_fill_after_polls(1, Decimal::new(11250, 1)),
    );
    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex).with_rate("BTC", "LTC", Decimal::new(7533, 1)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(protocol.clone());
    registry.register(dex.clone());
    let mut router_config = fast_config();
    router_config.p2p.enabled = false;
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("BTC"),
            Decimal::new(15, 1),
            Asset::new("LTC"),
        )
        .await
        .unwrap();
    let done = router.execute(swap.id).await.unwrap();

    assert_eq!(done.phase, SwapPhase::Completed);
    assert_eq!(done.route, Some(SwapRoute::Protocol));
    assert_eq!(protocol.order_count().await, 1);
    assert_eq!(dex.order_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_match_refunds() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(6);
    fund(&ledger, &config, account, "ETH", "0xa6", "ETH", Decimal::from(2)).await;

    let p2p = Arc::new(
        MockRailAdapter::new(SwapRoute::P2p).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(p2p.clone());
    let router = build_router(&ledger, registry, fast_config());

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();

    let exec = {
        let router = router.clone();
        let id = swap.id;
        tokio::spawn(async move { router.execute(id).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(router.request_cancel(swap.id).await.unwrap());
    let done = exec.await.unwrap().unwrap();

    assert_eq!(done.phase, SwapPhase::Failed);
    assert_eq!(done.fail_reason.as_deref(), Some("cancelled by user"));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::from(2));
    assert_eq!(eth.locked, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_settlement_leaves_swap_for_recovery() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(7);
    fund(&ledger, &config, account, "ETH", "0xa7", "ETH", Decimal::from(2)).await;

    // Settlement never confirms on its own
    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(dex.clone());
    let mut router_config = fast_config();
    router_config.p2p.enabled = false;
    let sweep_policy = router_config.sweep.clone();
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();

    let exec = {
        let router = router.clone();
        let id = swap.id;
        tokio::spawn(async move { router.execute(id).await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(router.request_cancel(swap.id).await.unwrap());
    let err = exec.await.unwrap().unwrap_err();
    assert!(matches!(err, RouterError::Cancelled));

    // The submitted order is in flight, so nothing was committed or
    // refunded
    let pending = ledger.get_swap(swap.id).unwrap();
    assert_eq!(pending.phase, SwapPhase::DexPending);
    let order_ref = pending.order_ref.clone().unwrap();

    let sweep = RecoverySweep::new(ledger.clone(), router.clone(), sweep_policy);
    let stats = sweep.sweep_once().await.unwrap();
    assert_eq!(stats.left, 1);

    // Once the venue reports the fill, the sweep commits it
    dex.complete_order(&order_ref, Decimal::from(5250))
        .await
        .unwrap();
    let stats = sweep.sweep_once().await.unwrap();
    assert_eq!(stats.committed, 1);

    let done = ledger.get_swap(swap.id).unwrap();
    assert_eq!(done.phase, SwapPhase::Completed);
    let usdt = ledger.get_balance(account, &Asset::new("USDT")).unwrap();
    assert_eq!(usdt.amount, Decimal::from(5250));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_releases_expired_reservation() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(8);
    fund(&ledger, &config, account, "ETH", "0xa8", "ETH", Decimal::from(2)).await;

    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(dex);
    let mut router_config = fast_config();
    router_config.sweep.reservation_max_age_secs = 0;
    let sweep_policy = router_config.sweep.clone();
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();

    // Nobody ever calls execute; the sweep reclaims the reservation
    let sweep = RecoverySweep::new(ledger.clone(), router, sweep_policy);
    let stats = sweep.sweep_once().await.unwrap();
    assert_eq!(stats.released, 1);

    let released = ledger.get_swap(swap.id).unwrap();
    assert_eq!(released.phase, SwapPhase::Failed);
    assert_eq!(released.fail_reason.as_deref(), Some("reservation expired"));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::from(2));
    assert_eq!(eth.locked, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_refunds_stale_swap_without_order_reference() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(9);
    fund(&ledger, &config, account, "ETH", "0xa9", "ETH", Decimal::from(2)).await;

    let p2p = Arc::new(
        MockRailAdapter::new(SwapRoute::P2p).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(p2p);
    let mut router_config = fast_config();
    router_config.sweep.stale_after_secs = 0;
    let sweep_policy = router_config.sweep.clone();
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();

    // A crash between marking the phase and submitting the order leaves
    // no reference to poll
    ledger
        .update_swap_progress(swap.id, SwapPhase::P2pWaiting, Some(SwapRoute::P2p), None)
        .await
        .unwrap();

    let sweep = RecoverySweep::new(ledger.clone(), router, sweep_policy);
    let stats = sweep.sweep_once().await.unwrap();
    assert_eq!(stats.refunded, 1);

    let refunded = ledger.get_swap(swap.id).unwrap();
    assert_eq!(refunded.phase, SwapPhase::Failed);
    assert!(refunded
        .fail_reason
        .as_deref()
        .unwrap()
        .contains("abandoned before order submission"));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::from(2));
    assert_eq!(eth.locked, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_below_minimum_fill_still_commits() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(10);
    fund(&ledger, &config, account, "ETH", "0xa10", "ETH", Decimal::from(2)).await;

    // Settles under the accepted minimum of 5197.5
    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex)
            .with_rate("ETH", "USDT", Decimal::from(3500))
            .with_fill_after_polls(1, Decimal::from(5000)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(dex);
    let mut router_config = fast_config();
    router_config.p2p.enabled = false;
    let router = build_router(&ledger, registry, router_config);

    let swap = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap();
    assert_eq!(swap.min_to_amount, Decimal::new(51975, 1));

    let done = router.execute(swap.id).await.unwrap();

    // The settled amount is what the account receives, deviation and all
    assert_eq!(done.phase, SwapPhase::Completed);
    assert_eq!(done.actual_to_amount, Some(Decimal::from(5000)));
    let usdt = ledger.get_balance(account, &Asset::new("USDT")).unwrap();
    assert_eq!(usdt.amount, Decimal::from(5000));
}

#[tokio::test(start_paused = true)]
async fn test_reserve_rejects_insufficient_funds() {
    let (ledger, config, _temp) = open_ledger();
    let account = AccountId::new(11);
    fund(&ledger, &config, account, "ETH", "0xa11", "ETH", Decimal::ONE).await;

    let dex = Arc::new(
        MockRailAdapter::new(SwapRoute::Dex).with_rate("ETH", "USDT", Decimal::from(3500)),
    );
    let mut registry = AdapterRegistry::new();
    registry.register(dex);
    let router = build_router(&ledger, registry, fast_config());

    let err = router
        .create_swap(
            account,
            Asset::new("ETH"),
            Decimal::new(15, 1),
            Asset::new("USDT"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::InsufficientFunds(_)));

    let eth = ledger.get_balance(account, &Asset::new("ETH")).unwrap();
    assert_eq!(eth.amount, Decimal::ONE);
    assert_eq!(eth.locked, Decimal::ZERO);
}
