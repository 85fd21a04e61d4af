//! Transaction recorder: the at-most-once gate for chain events
//!
//! Every balance effect driven by an on-chain event passes through
//! [`TransactionRecorder::record_with`]. The recorder serializes all work for
//! a given `(chain, tx_hash, tx_index)` key on a hash-picked stripe, checks
//! the idempotency ledger, and only then runs the caller's effect closure.
//! A key that already reached a final effect short-circuits without running
//! the closure.
//!
//! Stripes are plain sync mutexes and the effect closure is synchronous, so
//! no stripe is ever held across an await point. Callers that also need an
//! account lock must take it before calling into the recorder.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{ProcessedTransaction, TxRef};

/// Outcome of a recorded effect
#[derive(Debug)]
pub enum RecordOutcome<T> {
    /// First time this key reached the recorder with a final effect pending;
    /// the closure ran and produced this value
    Fresh(T),

    /// Key already finalized; the closure did not run
    Duplicate(ProcessedTransaction),
}

impl<T> RecordOutcome<T> {
    /// True when the effect closure ran
    pub fn is_fresh(&self) -> bool {
        matches!(self, RecordOutcome::Fresh(_))
    }
}

/// Striped idempotency gate over the processed-transaction ledger
pub struct TransactionRecorder {
    storage: Arc<Storage>,
    stripes: Vec<Mutex<()>>,
}

impl TransactionRecorder {
    /// Create a recorder with the given stripe count (minimum 1)
    pub fn new(storage: Arc<Storage>, stripes: usize) -> Self {
        let count = stripes.max(1);
        Self {
            storage,
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe index for an idempotency key
    fn stripe_index(&self, tx: &TxRef) -> usize {
        let hash = blake3::hash(&tx.storage_key());
        let hash_bytes = hash.as_bytes();
        let hash_u32 =
            u32::from_le_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
        (hash_u32 % self.stripes.len() as u32) as usize
    }

    /// True when the key already reached a final effect
    pub fn is_processed(&self, tx: &TxRef) -> Result<bool> {
        Ok(self.storage.get_processed(tx)?.is_some())
    }

    /// Stored row for a finalized key, if any
    pub fn get(&self, tx: &TxRef) -> Result<Option<ProcessedTransaction>> {
        self.storage.get_processed(tx)
    }

    /// Run `effect` unless the key already reached a final effect
    ///
    /// The closure is responsible for persisting the
    /// [`ProcessedTransaction`] row (batched with its balance effect) when
    /// the effect is final. An effect that stays provisional, such as a
    /// deposit below its confirmation threshold, writes no row and will
    /// re-enter here on the next observation.
    pub fn record_with<T>(
        &self,
        tx: &TxRef,
        effect: impl FnOnce() -> Result<T>,
    ) -> Result<RecordOutcome<T>> {
        let _stripe = self.stripes[self.stripe_index(tx)].lock();

        if let Some(existing) = self.storage.get_processed(tx)? {
            tracing::debug!(tx = %tx, deposit_id = ?existing.deposit_id, "Duplicate chain event");
            return Ok(RecordOutcome::Duplicate(existing));
        }

        let value = effect()?;
        Ok(RecordOutcome::Fresh(value))
    }
}
