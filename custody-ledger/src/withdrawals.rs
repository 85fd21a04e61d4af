//! Withdrawal pipeline
//!
//! A withdrawal debits `amount + fee` the moment it is accepted; the debit
//! is the reservation. The row then walks the signing pipeline
//! (`Pending -> Building -> Signed -> Broadcast -> Confirming -> Completed`)
//! with no further balance effect. Failure or cancellation re-credits the
//! full debit exactly once, enforced by the terminal-state check under the
//! account lock. Signing and broadcast live behind [`WithdrawalBroadcaster`];
//! the ledger never touches keys.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::BalanceLedger;
use crate::types::{AccountId, Asset, Chain, Withdrawal, WithdrawalStatus};

/// Chain-side signing and broadcast, injected by the host
///
/// An `Err` reply is a guarantee that nothing reached the network; the
/// refund on failure depends on it. Implementations must resolve
/// ambiguous transport outcomes themselves before reporting.
#[async_trait]
pub trait WithdrawalBroadcaster: Send + Sync {
    /// Sign and broadcast a payment, returning the chain txid
    async fn sign_and_broadcast(
        &self,
        chain: &Chain,
        asset: &Asset,
        destination: &str,
        amount: Decimal,
    ) -> Result<String>;
}

/// Withdrawal pipeline over the ledger's locks and storage
pub struct WithdrawalProcessor {
    ledger: Arc<BalanceLedger>,
    config: Config,
}

impl WithdrawalProcessor {
    /// Create a processor sharing the ledger's storage and locks
    pub fn new(ledger: Arc<BalanceLedger>, config: Config) -> Self {
        Self { ledger, config }
    }

    /// Accept a withdrawal and debit `amount + fee`
    pub async fn request(
        &self,
        account: AccountId,
        chain: Chain,
        asset: Asset,
        amount: Decimal,
        fee: Decimal,
        destination: impl Into<String>,
    ) -> Result<Withdrawal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "withdrawal amount must be positive, got {}",
                amount
            )));
        }
        if fee < Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "fee must not be negative, got {}",
                fee
            )));
        }
        let destination = destination.into();
        if destination.is_empty() {
            return Err(Error::InvalidRequest("empty destination address".to_string()));
        }

        let _guard = self.ledger.lock_account(account).await?;

        let mut balance = self.ledger.storage().get_balance(account, &asset)?;
        balance.debit(&asset, amount + fee)?;

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::now_v7(),
            account,
            chain,
            asset,
            amount,
            fee,
            destination,
            status: WithdrawalStatus::Pending,
            txid: None,
            fail_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.ledger
            .storage()
            .apply_withdrawal_request(&withdrawal, &balance)?;
        self.ledger.metrics().withdrawals_requested.inc();

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            account = %withdrawal.account,
            asset = %withdrawal.asset,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            "Withdrawal accepted"
        );
        Ok(withdrawal)
    }

    /// Advance the pipeline to the next non-refunding status
    pub async fn advance(
        &self,
        id: Uuid,
        next: WithdrawalStatus,
        txid: Option<String>,
    ) -> Result<Withdrawal> {
        if matches!(next, WithdrawalStatus::Failed | WithdrawalStatus::Cancelled) {
            return Err(Error::InvalidTransition(
                "refunding statuses go through fail or cancel".to_string(),
            ));
        }

        let peek = self.ledger.storage().get_withdrawal(id)?;
        let _guard = self.ledger.lock_account(peek.account).await?;

        let mut withdrawal = self.ledger.storage().get_withdrawal(id)?;
        if !withdrawal.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "withdrawal {}: {:?} -> {:?}",
                id, withdrawal.status, next
            )));
        }

        withdrawal.status = next;
        if let Some(txid) = txid {
            withdrawal.txid = Some(txid);
        }
        withdrawal.updated_at = Utc::now();
        self.ledger.storage().put_withdrawal(&withdrawal)?;

        tracing::info!(
            withdrawal_id = %id,
            status = ?next,
            txid = ?withdrawal.txid,
            "Withdrawal advanced"
        );
        Ok(withdrawal)
    }

    /// Drive a pending withdrawal through signing and broadcast
    ///
    /// The row is marked `Building` before the broadcaster runs, so a
    /// crash mid-call leaves a visibly in-progress withdrawal for an
    /// operator to resolve. A broadcaster error refunds and returns the
    /// `Failed` row; the lock-level errors still propagate.
    pub async fn execute(
        &self,
        id: Uuid,
        broadcaster: &dyn WithdrawalBroadcaster,
    ) -> Result<Withdrawal> {
        let withdrawal = self.advance(id, WithdrawalStatus::Building, None).await?;

        let txid = match broadcaster
            .sign_and_broadcast(
                &withdrawal.chain,
                &withdrawal.asset,
                &withdrawal.destination,
                withdrawal.amount,
            )
            .await
        {
            Ok(txid) => txid,
            Err(e) => {
                tracing::warn!(
                    withdrawal_id = %id,
                    error = %e,
                    "Broadcast failed, refunding withdrawal"
                );
                return self.fail(id, &format!("broadcast failed: {}", e)).await;
            }
        };

        self.advance(id, WithdrawalStatus::Signed, None).await?;
        self.advance(id, WithdrawalStatus::Broadcast, Some(txid))
            .await?;
        self.advance(id, WithdrawalStatus::Confirming, None).await
    }

    /// Report the chain-side confirmation count for a broadcast withdrawal
    ///
    /// Completes the row once the per-chain minimum is reached; earlier
    /// reports return the unchanged `Confirming` row.
    pub async fn confirm(&self, id: Uuid, confirmations: u32) -> Result<Withdrawal> {
        let peek = self.ledger.storage().get_withdrawal(id)?;
        let _guard = self.ledger.lock_account(peek.account).await?;

        let mut withdrawal = self.ledger.storage().get_withdrawal(id)?;
        if withdrawal.status != WithdrawalStatus::Confirming {
            return Err(Error::InvalidTransition(format!(
                "withdrawal {} is {:?}, not awaiting confirmations",
                id, withdrawal.status
            )));
        }

        let required = self.config.min_confirmations_for(&withdrawal.chain);
        if confirmations < required {
            tracing::debug!(
                withdrawal_id = %id,
                confirmations,
                required,
                "Withdrawal still confirming"
            );
            return Ok(withdrawal);
        }

        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.updated_at = Utc::now();
        self.ledger.storage().put_withdrawal(&withdrawal)?;
        self.ledger.metrics().withdrawals_completed.inc();

        tracing::info!(withdrawal_id = %id, confirmations, "Withdrawal completed");
        Ok(withdrawal)
    }

    /// Fail a withdrawal and refund the full debit
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<Withdrawal> {
        let peek = self.ledger.storage().get_withdrawal(id)?;
        let _guard = self.ledger.lock_account(peek.account).await?;

        let mut withdrawal = self.ledger.storage().get_withdrawal(id)?;
        if withdrawal.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "withdrawal {} already {:?}, refusing refund",
                id, withdrawal.status
            )));
        }

        let mut balance = self
            .ledger
            .storage()
            .get_balance(withdrawal.account, &withdrawal.asset)?;
        balance.credit(withdrawal.total_debit());

        withdrawal.status = WithdrawalStatus::Failed;
        withdrawal.fail_reason = Some(reason.to_string());
        withdrawal.updated_at = Utc::now();

        self.ledger
            .storage()
            .apply_withdrawal_refund(&withdrawal, &balance)?;
        self.ledger.metrics().withdrawals_refunded.inc();

        tracing::warn!(withdrawal_id = %id, reason = %reason, "Withdrawal failed and refunded");
        Ok(withdrawal)
    }

    /// Cancel a withdrawal that has not reached the network, refunding the
    /// full debit
    pub async fn cancel(&self, id: Uuid) -> Result<Withdrawal> {
        let peek = self.ledger.storage().get_withdrawal(id)?;
        let _guard = self.ledger.lock_account(peek.account).await?;

        let mut withdrawal = self.ledger.storage().get_withdrawal(id)?;
        if !withdrawal.status.can_transition_to(WithdrawalStatus::Cancelled) {
            return Err(Error::InvalidTransition(format!(
                "withdrawal {} is {:?}, too late to cancel",
                id, withdrawal.status
            )));
        }

        let mut balance = self
            .ledger
            .storage()
            .get_balance(withdrawal.account, &withdrawal.asset)?;
        balance.credit(withdrawal.total_debit());

        withdrawal.status = WithdrawalStatus::Cancelled;
        withdrawal.updated_at = Utc::now();

        self.ledger
            .storage()
            .apply_withdrawal_refund(&withdrawal, &balance)?;
        self.ledger.metrics().withdrawals_refunded.inc();

        tracing::info!(withdrawal_id = %id, "Withdrawal cancelled and refunded");
        Ok(withdrawal)
    }

    /// Get withdrawal by ID
    pub fn get(&self, id: Uuid) -> Result<Withdrawal> {
        self.ledger.storage().get_withdrawal(id)
    }
}
