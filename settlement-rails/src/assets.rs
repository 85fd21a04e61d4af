//! Asset classification for fallback routing
//!
//! When the P2P leg times out, the source asset's class picks the one
//! fallback rail. UTXO and native-settlement coins go through the
//! cross-chain protocol; smart-contract assets go to the DEX. This is a
//! fixed table, not a runtime race between rails.

use custody_ledger::{Asset, SwapRoute};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Settlement class of a source asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// UTXO and native-settlement coins
    Native,
    /// Assets with smart-contract support
    Contract,
}

impl AssetClass {
    /// The fallback rail for this class
    pub fn fallback_route(self) -> SwapRoute {
        match self {
            AssetClass::Native => SwapRoute::Protocol,
            AssetClass::Contract => SwapRoute::Dex,
        }
    }
}

/// Asset-to-class mapping with a built-in default set
///
/// Unlisted assets are treated as [`AssetClass::Contract`] since the DEX
/// rail is the broadest venue.
#[derive(Debug, Clone)]
pub struct AssetClassTable {
    classes: HashMap<Asset, AssetClass>,
}

const NATIVE_ASSETS: &[&str] = &["BTC", "LTC", "BCH", "DOGE", "DASH", "ZEC", "XMR"];

impl Default for AssetClassTable {
    fn default() -> Self {
        let classes = NATIVE_ASSETS
            .iter()
            .map(|sym| (Asset::new(sym), AssetClass::Native))
            .collect();
        Self { classes }
    }
}

impl AssetClassTable {
    /// The built-in table
    pub fn new() -> Self {
        Self::default()
    }

    /// Override or extend the classification
    pub fn with_class(mut self, asset: &str, class: AssetClass) -> Self {
        self.classes.insert(Asset::new(asset), class);
        self
    }

    /// Class of an asset
    pub fn class_of(&self, asset: &Asset) -> AssetClass {
        self.classes
            .get(asset)
            .copied()
            .unwrap_or(AssetClass::Contract)
    }

    /// Fallback rail for a source asset
    pub fn fallback_for(&self, asset: &Asset) -> SwapRoute {
        self.class_of(asset).fallback_route()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let table = AssetClassTable::new();
        assert_eq!(table.class_of(&Asset::new("BTC")), AssetClass::Native);
        assert_eq!(table.class_of(&Asset::new("btc")), AssetClass::Native);
        assert_eq!(table.class_of(&Asset::new("ETH")), AssetClass::Contract);
        assert_eq!(table.class_of(&Asset::new("USDC")), AssetClass::Contract);
    }

    #[test]
    fn test_fallback_routes() {
        let table = AssetClassTable::new();
        assert_eq!(table.fallback_for(&Asset::new("LTC")), SwapRoute::Protocol);
        assert_eq!(table.fallback_for(&Asset::new("USDT")), SwapRoute::Dex);
    }

    #[test]
    fn test_override() {
        let table = AssetClassTable::new().with_class("ATOM", AssetClass::Native);
        assert_eq!(table.fallback_for(&Asset::new("ATOM")), SwapRoute::Protocol);
    }
}
