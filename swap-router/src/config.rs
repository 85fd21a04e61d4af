//! Router configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

/// Swap router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// P2P leg policy
    pub p2p: P2pPolicy,

    /// Fallback leg policy
    pub fallback: FallbackPolicy,

    /// Slippage tolerance applied to the quoted output when fixing the
    /// accepted minimum (basis points)
    pub slippage_bps: u32,

    /// Service fee taken out of the settled output (basis points)
    pub service_fee_bps: u32,

    /// Per-rail quote timeout (milliseconds)
    pub quote_timeout_ms: u64,

    /// Consecutive status-poll failures tolerated before the swap is left
    /// for the recovery sweep
    pub max_poll_failures: u32,

    /// Recovery sweep policy
    pub sweep: SweepPolicy,
}

/// Bounds on the P2P matching attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pPolicy {
    /// Whether the P2P leg is attempted at all
    pub enabled: bool,

    /// How long to wait for a counterparty before falling back (seconds)
    pub wait_secs: u64,

    /// Order status poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

/// Bounds on the fallback settlement leg
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    /// How long to monitor a submitted settlement before giving up and
    /// refunding (seconds)
    pub confirm_wait_secs: u64,

    /// Settlement status poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

/// Recovery sweep cadence and staleness thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPolicy {
    /// Sweep interval (seconds)
    pub interval_secs: u64,

    /// Age after which an untouched reservation is released (seconds)
    pub reservation_max_age_secs: u64,

    /// Age after which an in-flight swap with no order reference is
    /// refunded (seconds)
    pub stale_after_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            p2p: P2pPolicy::default(),
            fallback: FallbackPolicy::default(),
            slippage_bps: 100,
            service_fee_bps: 0,
            quote_timeout_ms: 1_500,
            max_poll_failures: 10,
            sweep: SweepPolicy::default(),
        }
    }
}

impl Default for P2pPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_secs: 180,
            poll_interval_ms: 500,
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            confirm_wait_secs: 900,
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            reservation_max_age_secs: 3_600,
            stale_after_secs: 3_600,
        }
    }
}

impl RouterConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("Failed to read config: {}", e)))?;
        let config: RouterConfig = toml::from_str(&content)
            .map_err(|e| RouterError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = RouterConfig::default();

        if let Ok(wait) = std::env::var("SWAPD_P2P_WAIT_SECS") {
            config.p2p.wait_secs = wait
                .parse()
                .map_err(|e| RouterError::Config(format!("Invalid P2P wait: {}", e)))?;
        }

        if let Ok(slippage) = std::env::var("SWAPD_SLIPPAGE_BPS") {
            config.slippage_bps = slippage
                .parse()
                .map_err(|e| RouterError::Config(format!("Invalid slippage: {}", e)))?;
        }

        if let Ok(interval) = std::env::var("SWAPD_SWEEP_INTERVAL_SECS") {
            config.sweep.interval_secs = interval
                .parse()
                .map_err(|e| RouterError::Config(format!("Invalid sweep interval: {}", e)))?;
        }

        Ok(config)
    }
}
