use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

/// Held while an account is being mutated.
pub type AccountGuard = OwnedMutexGuard<()>;

/// Registry of per-account exclusive locks.
///
/// Slots are created on demand and only dropped by [`AccountLocks::prune`]
/// once nobody holds or waits on them.
#[derive(Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &AccountId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_default())
    }

    pub async fn lock(&self, id: &AccountId) -> AccountGuard {
        self.slot(id).lock_owned().await
    }

    /// Lock two distinct accounts, always acquiring them in id order so two
    /// opposite transfers cannot deadlock. Guards come back as `(a, b)`.
    pub async fn lock_pair(&self, a: &AccountId, b: &AccountId) -> (AccountGuard, AccountGuard) {
        debug_assert_ne!(a, b, "lock_pair needs two distinct accounts");
        if a <= b {
            let first = self.lock(a).await;
            let second = self.lock(b).await;
            (first, second)
        } else {
            let first = self.lock(b).await;
            let second = self.lock(a).await;
            (second, first)
        }
    }

    /// Drop slots nobody is holding or waiting on.
    pub fn prune(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
