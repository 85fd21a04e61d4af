//! Deposit ingestion
//!
//! Chain events arrive from webhooks and scanners, frequently more than once
//! per transfer. The processor resolves the destination address against the
//! registry, holds the owning account's lock, and routes the event through
//! the [`TransactionRecorder`] so each `(chain, tx_hash, tx_index)` credits
//! at most once, across sources and across replays.
//!
//! Events below the chain's confirmation threshold are tracked on a
//! provisional deposit row without touching the idempotency ledger, so the
//! confirming re-observation still gets to credit.
//!
//! Address bindings match byte-for-byte; normalization (hex casing,
//! checksums) is the address provider's job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::BalanceLedger;
use crate::recorder::RecordOutcome;
use crate::types::{
    AccountId, Asset, Chain, Deposit, DepositAddress, DepositStatus, EventSource,
    ProcessedTransaction, TxRef,
};

/// Per-chain address derivation, injected by the host
///
/// One implementation per chain family, selected by the caller. The
/// registry stores whatever the deriver returns byte-for-byte.
#[async_trait]
pub trait AddressDeriver: Send + Sync {
    /// Derive a fresh deposit address for an account on a chain
    async fn derive_address(&self, account: AccountId, chain: &Chain) -> Result<String>;
}

/// One observed chain event, as delivered by a webhook or scanner
#[derive(Debug, Clone)]
pub struct DepositEvent {
    /// Origin of the observation
    pub source: EventSource,

    /// Idempotency key of the transfer
    pub tx: TxRef,

    /// Destination address as observed on-chain
    pub to_address: String,

    /// Asset transferred
    pub asset: Asset,

    /// Amount transferred
    pub amount: Decimal,

    /// Confirmations at observation time
    pub confirmations: u32,

    /// Raw provider payload, kept for audit
    pub raw: serde_json::Value,
}

/// Effect a processed event had
#[derive(Debug)]
pub enum DepositOutcome {
    /// Balance credited
    Credited(Deposit),

    /// Below the confirmation threshold; tracked, not credited
    Pending(Deposit),

    /// Event already reached its final effect earlier
    Duplicate,

    /// Address not in the registry (or bound to a different asset);
    /// recorded for audit, nothing credited
    Unrecognized,
}

/// Deposit pipeline over the ledger's locks, recorder and storage
pub struct DepositProcessor {
    ledger: Arc<BalanceLedger>,
    config: Config,
}

impl DepositProcessor {
    /// Create a processor sharing the ledger's storage and locks
    pub fn new(ledger: Arc<BalanceLedger>, config: Config) -> Self {
        Self { ledger, config }
    }

    /// Register a deposit address binding for an account
    pub fn register_address(
        &self,
        account: AccountId,
        chain: Chain,
        address: impl Into<String>,
        asset: Asset,
    ) -> Result<DepositAddress> {
        let binding = DepositAddress {
            chain,
            address: address.into(),
            account,
            asset,
            created_at: Utc::now(),
        };
        self.ledger.storage().put_address(&binding)?;
        tracing::info!(
            account = %binding.account,
            chain = %binding.chain,
            address = %binding.address,
            asset = %binding.asset,
            "Deposit address registered"
        );
        Ok(binding)
    }

    /// Derive a deposit address through the host's deriver and register it
    pub async fn provision_address(
        &self,
        account: AccountId,
        chain: Chain,
        asset: Asset,
        deriver: &dyn AddressDeriver,
    ) -> Result<DepositAddress> {
        let address = deriver.derive_address(account, &chain).await?;
        self.register_address(account, chain, address, asset)
    }

    /// Process one observed chain event
    pub async fn process(&self, event: DepositEvent) -> Result<DepositOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "deposit amount must be positive, got {}",
                event.amount
            )));
        }

        let binding = self
            .ledger
            .storage()
            .lookup_address(&event.tx.chain, &event.to_address)?;

        let binding = match binding {
            Some(b) if b.asset == event.asset => b,
            Some(b) => {
                tracing::warn!(
                    tx = %event.tx,
                    address = %event.to_address,
                    observed = %event.asset,
                    bound = %b.asset,
                    "Asset mismatch on bound address"
                );
                return self.record_unrecognized(&event);
            }
            None => {
                tracing::warn!(
                    tx = %event.tx,
                    address = %event.to_address,
                    amount = %event.amount,
                    "Deposit to unrecognized address"
                );
                return self.record_unrecognized(&event);
            }
        };

        // Account lock first, recorder stripe second. Same order everywhere.
        let _guard = self.ledger.lock_account(binding.account).await?;

        let outcome = self
            .ledger
            .recorder()
            .record_with(&event.tx, || self.apply(&binding, &event))?;

        match outcome {
            RecordOutcome::Fresh(o) => Ok(o),
            RecordOutcome::Duplicate(_) => {
                self.ledger.metrics().deposits_duplicate.inc();
                tracing::debug!(tx = %event.tx, source = %event.source, "Duplicate deposit event");
                Ok(DepositOutcome::Duplicate)
            }
        }
    }

    /// Apply a fresh event for a recognized address; runs under the account
    /// lock and the recorder stripe
    fn apply(&self, binding: &DepositAddress, event: &DepositEvent) -> Result<DepositOutcome> {
        let threshold = self.config.min_confirmations_for(&event.tx.chain);
        let now = Utc::now();

        let mut deposit = match self.find_pending(&event.tx)? {
            Some(existing) => existing,
            None => Deposit {
                id: Uuid::now_v7(),
                account: binding.account,
                tx: event.tx.clone(),
                asset: event.asset.clone(),
                amount: event.amount,
                to_address: event.to_address.clone(),
                status: DepositStatus::Pending,
                confirmations: 0,
                created_at: now,
                updated_at: now,
            },
        };
        deposit.confirmations = deposit.confirmations.max(event.confirmations);
        deposit.updated_at = now;

        if deposit.confirmations < threshold {
            self.ledger.storage().put_deposit(&deposit)?;
            tracing::debug!(
                deposit_id = %deposit.id,
                tx = %event.tx,
                confirmations = deposit.confirmations,
                required = threshold,
                "Deposit pending confirmations"
            );
            return Ok(DepositOutcome::Pending(deposit));
        }

        deposit.status = DepositStatus::Confirmed;

        let mut balance = self
            .ledger
            .storage()
            .get_balance(binding.account, &event.asset)?;
        balance.credit(event.amount);

        let processed = ProcessedTransaction {
            tx: event.tx.clone(),
            source: event.source,
            asset: event.asset.clone(),
            amount: event.amount,
            to_address: event.to_address.clone(),
            deposit_id: Some(deposit.id),
            raw: event.raw.to_string(),
            processed_at: now,
        };

        self.ledger
            .storage()
            .apply_deposit(&deposit, &processed, &balance)?;
        self.ledger.metrics().deposits_credited.inc();

        tracing::info!(
            deposit_id = %deposit.id,
            account = %binding.account,
            asset = %event.asset,
            amount = %event.amount,
            tx = %event.tx,
            source = %event.source,
            "Deposit credited"
        );
        Ok(DepositOutcome::Credited(deposit))
    }

    /// Finalize an event that credits nobody, so replays short-circuit
    fn record_unrecognized(&self, event: &DepositEvent) -> Result<DepositOutcome> {
        let outcome = self.ledger.recorder().record_with(&event.tx, || {
            let processed = ProcessedTransaction {
                tx: event.tx.clone(),
                source: event.source,
                asset: event.asset.clone(),
                amount: event.amount,
                to_address: event.to_address.clone(),
                deposit_id: None,
                raw: event.raw.to_string(),
                processed_at: Utc::now(),
            };
            self.ledger.storage().put_processed(&processed)
        })?;

        match outcome {
            RecordOutcome::Fresh(()) => {
                self.ledger.metrics().deposits_unrecognized.inc();
                Ok(DepositOutcome::Unrecognized)
            }
            RecordOutcome::Duplicate(_) => {
                self.ledger.metrics().deposits_duplicate.inc();
                Ok(DepositOutcome::Duplicate)
            }
        }
    }

    /// Mark a pending deposit as invalidated (reorged out, provider
    /// retraction). Writes no idempotency row: if the transfer re-mines,
    /// the fresh observation credits through a new deposit row.
    pub async fn invalidate(&self, deposit_id: Uuid, reason: &str) -> Result<Deposit> {
        let peek = self.ledger.storage().get_deposit(deposit_id)?;
        let _guard = self.ledger.lock_account(peek.account).await?;

        let mut deposit = self.ledger.storage().get_deposit(deposit_id)?;
        if deposit.status != DepositStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "deposit {} is {:?}, only pending deposits can be invalidated",
                deposit_id, deposit.status
            )));
        }
        deposit.status = DepositStatus::Failed;
        deposit.updated_at = Utc::now();
        self.ledger.storage().put_deposit(&deposit)?;

        tracing::warn!(deposit_id = %deposit_id, reason = %reason, "Deposit invalidated");
        Ok(deposit)
    }

    /// True when a chain event already reached its final balance effect
    pub fn is_processed(&self, tx: &TxRef) -> Result<bool> {
        self.ledger.recorder().is_processed(tx)
    }

    /// Deposits still waiting on confirmations
    pub fn pending(&self) -> Result<Vec<Deposit>> {
        self.ledger.storage().pending_deposits()
    }

    fn find_pending(&self, tx: &TxRef) -> Result<Option<Deposit>> {
        Ok(self
            .ledger
            .storage()
            .pending_deposits()?
            .into_iter()
            .find(|d| &d.tx == tx))
    }
}
