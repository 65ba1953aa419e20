//! Per-position mutual exclusion. The executor is the only acquirer: it
//! takes the lock before simulation and the handle's drop releases it on
//! every exit path, including panicked or cancelled futures.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::now_ts;

/// `(user, chain, target contract)` — the unit of serialization across all
/// engines. Two operations on the same position never overlap; unrelated
/// positions proceed in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub user_id: String,
    pub chain_id: u64,
    pub target: String,
}

impl LockKey {
    pub fn new(user_id: impl Into<String>, chain_id: u64, target: impl Into<String>) -> Self {
        LockKey { user_id: user_id.into(), chain_id, target: target.into().to_lowercase() }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.chain_id, self.target)
    }
}

/// An exclusively held position. Released on drop.
pub struct LockHandle {
    _guard: OwnedMutexGuard<()>,
    pub key: LockKey,
    pub acquired_at: i64,
}

pub struct PositionLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl Default for PositionLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionLocks {
    pub fn new() -> Self {
        PositionLocks { locks: DashMap::new() }
    }

    /// Acquire the exclusive lock for `key`, waiting at most `timeout`.
    /// `None` means another operation holds the position.
    pub async fn acquire(&self, key: LockKey, timeout: Duration) -> Option<LockHandle> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Some(LockHandle { _guard: guard, key, acquired_at: now_ts() }),
            Err(_) => None,
        }
    }
}
