//! Settlement rails for the swap service
//!
//! A rail is anything that can turn one asset into another: the P2P
//! matching desk, a cross-chain protocol, or an on-chain DEX. Each rail
//! implements [`SettlementAdapter`] and the router drives them all through
//! that one surface.
//!
//! The venue-facing side of each rail is a transport trait
//! ([`P2pDesk`], [`ProtocolGateway`], [`DexApi`] plus [`Broadcaster`]) so
//! production wiring and tests plug in at the same seam.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod types;
pub mod adapter;
pub mod assets;
pub mod quotes;
pub mod p2p;
pub mod protocol;
pub mod dex;
pub mod mock;

pub use adapter::{AdapterRegistry, SettlementAdapter};
pub use assets::{AssetClass, AssetClassTable};
pub use dex::{Broadcaster, DexAdapter, DexApi, DexSwapTx, DexTxState};
pub use error::{RailError, Result};
pub use mock::MockRailAdapter;
pub use p2p::{MatchState, P2pAdapter, P2pDesk};
pub use protocol::{ProtocolAdapter, ProtocolGateway, ProtocolSwapState};
pub use quotes::{QuoteAggregator, RateSource, StaticRateSource};
pub use types::{OrderAck, OrderRequest, OrderStatus, RailQuote};
