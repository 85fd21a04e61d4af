//! Per-account async locks
//!
//! Every balance-mutating operation serializes on the owning account's lock.
//! Locks are keyed by account in a concurrent map and acquired with a
//! timeout so a wedged operation surfaces as an error instead of a stall.
//!
//! Lock ordering: the account lock is always taken before any recorder
//! stripe, and stripes are never held across an await point.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::types::AccountId;

/// Registry of per-account mutexes
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Held account lock; balance mutations for the account are exclusive while
/// this guard lives
pub struct AccountGuard {
    account: AccountId,
    _guard: OwnedMutexGuard<()>,
}

impl AccountGuard {
    /// Account this guard serializes
    pub fn account(&self) -> AccountId {
        self.account
    }
}

impl AccountLocks {
    /// Create a lock registry with the given acquisition timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire the lock for an account, waiting up to the configured timeout
    pub async fn acquire(&self, account: AccountId) -> Result<AccountGuard> {
        let mutex = self
            .locks
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(AccountGuard {
                account,
                _guard: guard,
            }),
            Err(_) => Err(Error::LockTimeout {
                account,
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Number of accounts that have ever been locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no account has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
