//! Core types for the custody ledger
//!
//! All persisted rows are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for amounts)
//! - Explicit status machines with guarded transitions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (numeric id assigned by the front end, e.g. bot user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(u64);

impl AccountId {
    /// Create new account ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Big-endian key bytes (sorts numerically in RocksDB)
    pub fn key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset symbol ("BTC", "ETH", "USDT", ...), uppercase-normalized
///
/// The service spans dozens of chains, so this is an open newtype rather
/// than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    /// Create new asset symbol (normalizes to uppercase)
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blockchain identifier ("BTC", "ETH", "BSC", ...), uppercase-normalized
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chain(String);

impl Chain {
    /// Create new chain identifier (normalizes to uppercase)
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_uppercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account row: identity anchor, created on first interaction, never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Numeric account id
    pub id: AccountId,

    /// External identity reference (e.g. messenger user handle)
    pub external_ref: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Balance row, keyed by (account, asset)
///
/// Invariant: `0 <= locked <= amount` at every observable point.
/// The available balance is always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Total amount owned
    pub amount: Decimal,

    /// Amount reserved for in-flight swaps/withdrawals
    pub locked: Decimal,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Empty balance row
    pub fn zero() -> Self {
        Self {
            amount: Decimal::ZERO,
            locked: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Derived available balance: `amount - locked`
    pub fn available(&self) -> Decimal {
        self.amount - self.locked
    }

    /// Add to the total amount
    pub fn credit(&mut self, amount: Decimal) {
        self.amount += amount;
        self.updated_at = Utc::now();
    }

    /// Subtract from the total amount; fails when it exceeds the available
    /// balance
    pub fn debit(&mut self, asset: &Asset, amount: Decimal) -> crate::Result<()> {
        if amount > self.available() {
            return Err(crate::Error::InsufficientBalance {
                asset: asset.clone(),
                requested: amount,
                available: self.available(),
            });
        }
        self.amount -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reserve funds: raise `locked` without touching `amount`
    pub fn lock(&mut self, asset: &Asset, amount: Decimal) -> crate::Result<()> {
        if amount > self.available() {
            return Err(crate::Error::InsufficientBalance {
                asset: asset.clone(),
                requested: amount,
                available: self.available(),
            });
        }
        self.locked += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Release a reservation, floored at zero (a double-unlock must never
    /// drive `locked` negative)
    pub fn unlock(&mut self, amount: Decimal) {
        self.locked = (self.locked - amount).max(Decimal::ZERO);
        self.updated_at = Utc::now();
    }
}

/// Read-only balance snapshot exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    /// Total amount owned
    pub amount: Decimal,
    /// Reserved amount
    pub locked: Decimal,
    /// Derived `amount - locked`
    pub available: Decimal,
}

impl From<&Balance> for BalanceView {
    fn from(b: &Balance) -> Self {
        Self {
            amount: b.amount,
            locked: b.locked,
            available: b.available(),
        }
    }
}

/// Idempotency key uniquely identifying a blockchain transfer event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    /// Chain the transaction landed on
    pub chain: Chain,

    /// Transaction hash
    pub tx_hash: String,

    /// Output/log index within the transaction
    pub tx_index: u32,
}

impl TxRef {
    /// Create new transaction reference
    pub fn new(chain: Chain, tx_hash: impl Into<String>, tx_index: u32) -> Self {
        Self {
            chain,
            tx_hash: tx_hash.into(),
            tx_index,
        }
    }

    /// Storage key: `chain|tx_hash|index`
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = self.chain.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(self.tx_hash.as_bytes());
        key.push(b'|');
        key.extend_from_slice(&self.tx_index.to_be_bytes());
        key
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.tx_hash, self.tx_index)
    }
}

/// Where an observed chain event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Pushed by a node/provider webhook
    Webhook,
    /// Found by a periodic chain scanner
    Scanner,
    /// Replayed during reconciliation
    Reconciliation,
    /// Entered by an operator
    Manual,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventSource::Webhook => "webhook",
            EventSource::Scanner => "scanner",
            EventSource::Reconciliation => "reconciliation",
            EventSource::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// Idempotency ledger row: one per chain event that reached a final effect
///
/// Immutable after creation. Its existence is the single source of truth for
/// "already credited" (or "already recorded as unrecognized").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    /// The idempotency key
    pub tx: TxRef,

    /// Origin of the winning observation
    pub source: EventSource,

    /// Asset transferred
    pub asset: Asset,

    /// Amount transferred
    pub amount: Decimal,

    /// Destination address as observed on-chain
    pub to_address: String,

    /// Deposit this event produced (None for unrecognized addresses)
    pub deposit_id: Option<Uuid>,

    /// Raw observed payload, kept verbatim for audit
    pub raw: String,

    /// When the event was recorded
    pub processed_at: DateTime<Utc>,
}

/// Deposit address binding: routes an observed (chain, address) pair to the
/// owning account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    /// Chain the address lives on
    pub chain: Chain,

    /// The address itself
    pub address: String,

    /// Account credited on deposit
    pub account: AccountId,

    /// Asset this address receives
    pub asset: Asset,

    /// When the binding was registered
    pub created_at: DateTime<Utc>,
}

/// Deposit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DepositStatus {
    /// Observed, below the confirmation threshold
    Pending = 1,
    /// Confirmed and credited (terminal)
    Confirmed = 2,
    /// Invalidated, never credited (terminal)
    Failed = 3,
}

impl DepositStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Confirmed | DepositStatus::Failed)
    }
}

/// One observed inbound transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    /// Unique deposit id (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Receiving account
    pub account: AccountId,

    /// On-chain event this deposit tracks
    pub tx: TxRef,

    /// Asset deposited
    pub asset: Asset,

    /// Amount deposited
    pub amount: Decimal,

    /// Destination deposit address
    pub to_address: String,

    /// Current status
    pub status: DepositStatus,

    /// Confirmations seen so far
    pub confirmations: u32,

    /// First-observed timestamp
    pub created_at: DateTime<Utc>,

    /// Last-updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Withdrawal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WithdrawalStatus {
    /// Requested, funds debited
    Pending = 1,
    /// Transaction being constructed
    Building = 2,
    /// Transaction signed
    Signed = 3,
    /// Broadcast to the network
    Broadcast = 4,
    /// Waiting for confirmations
    Confirming = 5,
    /// Confirmed on-chain (terminal)
    Completed = 6,
    /// Failed, funds refunded (terminal)
    Failed = 7,
    /// Cancelled before broadcast, funds refunded (terminal)
    Cancelled = 8,
}

impl WithdrawalStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled
        )
    }

    /// Valid forward transitions of the withdrawal pipeline
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        match (self, next) {
            (Pending, Building) | (Building, Signed) | (Signed, Broadcast) => true,
            (Broadcast, Confirming) | (Confirming, Completed) => true,
            // Failure is reachable from any non-terminal state
            (s, Failed) if !s.is_terminal() => true,
            // Cancellation only before the transaction hits the network
            (Pending, Cancelled) | (Building, Cancelled) | (Signed, Cancelled) => true,
            _ => false,
        }
    }
}

/// Outbound transfer with an immediate balance debit as its reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Unique withdrawal id
    pub id: Uuid,

    /// Paying account
    pub account: AccountId,

    /// Destination chain
    pub chain: Chain,

    /// Asset withdrawn
    pub asset: Asset,

    /// Amount sent to the destination
    pub amount: Decimal,

    /// Network/service fee, debited together with the amount
    pub fee: Decimal,

    /// Destination address
    pub destination: String,

    /// Current status
    pub status: WithdrawalStatus,

    /// Broadcast transaction id, once known
    pub txid: Option<String>,

    /// Failure reason, if terminal-failed
    pub fail_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last-updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Total debited at request time (refunded on failure/cancellation)
    pub fn total_debit(&self) -> Decimal {
        self.amount + self.fee
    }
}

/// Settlement rail a swap was routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapRoute {
    /// Peer-to-peer atomic swap
    P2p,
    /// Cross-chain settlement protocol
    Protocol,
    /// On-chain DEX aggregator
    Dex,
}

impl fmt::Display for SwapRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapRoute::P2p => "p2p",
            SwapRoute::Protocol => "protocol",
            SwapRoute::Dex => "dex",
        };
        write!(f, "{}", s)
    }
}

/// Coarse swap status persisted for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwapStatus {
    /// Reserved, not yet handed to a rail
    Pending = 1,
    /// Executing on a settlement rail
    Routing = 2,
    /// Settled and committed (terminal)
    Completed = 3,
    /// Failed and refunded (terminal)
    Failed = 4,
}

impl SwapStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Completed | SwapStatus::Failed)
    }
}

/// Fine-grained router phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwapPhase {
    /// Quote accepted, nothing reserved yet
    Created = 1,
    /// Reservation locked on the from-asset balance
    Reserved = 2,
    /// Counter-order open, waiting for a P2P match
    P2pWaiting = 3,
    /// Matched, atomic settlement in progress
    P2pMatched = 4,
    /// Submitted to the cross-chain protocol rail
    ProtocolPending = 5,
    /// Submitted to the DEX aggregator rail
    DexPending = 6,
    /// Settled and committed (terminal)
    Completed = 7,
    /// Refunded (terminal)
    Failed = 8,
}

impl SwapPhase {
    /// Check if phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapPhase::Completed | SwapPhase::Failed)
    }

    /// Coarse status this phase maps to
    pub fn status(&self) -> SwapStatus {
        match self {
            SwapPhase::Created | SwapPhase::Reserved => SwapStatus::Pending,
            SwapPhase::P2pWaiting
            | SwapPhase::P2pMatched
            | SwapPhase::ProtocolPending
            | SwapPhase::DexPending => SwapStatus::Routing,
            SwapPhase::Completed => SwapStatus::Completed,
            SwapPhase::Failed => SwapStatus::Failed,
        }
    }
}

/// Swap row: owns a reservation on the from-asset balance for its lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    /// Unique swap id (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Owning account
    pub account: AccountId,

    /// Asset sold
    pub from_asset: Asset,

    /// Amount sold (equals the reservation)
    pub from_amount: Decimal,

    /// Asset bought
    pub to_asset: Asset,

    /// Output promised by the accepted quote
    pub expected_to_amount: Decimal,

    /// Accepted minimum: expected output minus the slippage tolerance
    pub min_to_amount: Decimal,

    /// Actual settled output, once known
    pub actual_to_amount: Option<Decimal>,

    /// Rail the swap was routed through, once chosen
    pub route: Option<SwapRoute>,

    /// Rail-side order reference, once submitted
    pub order_ref: Option<String>,

    /// Fine-grained router phase
    pub phase: SwapPhase,

    /// Coarse status (derived from phase on every transition)
    pub status: SwapStatus,

    /// Service fee charged on the swap
    pub fee: Decimal,

    /// Failure reason, if terminal-failed
    pub fail_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last-updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Swap {
    /// Check if the swap reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Advance the phase, keeping the coarse status in sync
    pub fn set_phase(&mut self, phase: SwapPhase) {
        self.phase = phase;
        self.status = phase.status();
        self.updated_at = Utc::now();
    }
}
