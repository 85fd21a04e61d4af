//! Prometheus metrics for the swap router

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Swaps driven to a terminal state, by route and outcome
    pub static ref SWAPS_EXECUTED_TOTAL: CounterVec = register_counter_vec!(
        "swap_router_executed_total",
        "Swaps driven to a terminal state",
        &["route", "outcome"]
    )
    .unwrap();

    /// Fallback transitions between rails
    pub static ref FALLBACKS_TOTAL: CounterVec = register_counter_vec!(
        "swap_router_fallbacks_total",
        "Fallback transitions between rails",
        &["from", "to"]
    )
    .unwrap();

    /// End-to-end execution duration per route
    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "swap_router_execution_duration_seconds",
        "Swap execution duration in seconds",
        &["route"]
    )
    .unwrap();

    /// Recovery sweep resolutions, by action taken
    pub static ref SWEEP_ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "swap_router_sweep_actions_total",
        "Recovery sweep resolutions",
        &["action"]
    )
    .unwrap();
}
