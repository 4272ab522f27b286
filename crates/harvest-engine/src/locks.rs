//! # Keyed Locks
//!
//! One async mutex per key (owner id, order id), created on demand.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DashMap<String, Arc<Mutex<()>>>                                        │
//! │                                                                         │
//! │  "buyer-1" ──► Mutex ◄── task A (holding)                               │
//! │                      ◄── task B (waiting)                               │
//! │  "buyer-2" ──► Mutex ◄── task C (holding)    independent of buyer-1     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The map shard lock is only held while looking up the entry, never while
//! waiting for or holding the per-key mutex.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drops entries nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
