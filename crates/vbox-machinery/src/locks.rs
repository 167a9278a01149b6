//! Per-label serialization of lifecycle operations.

use crate::types::MachineLabel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async mutexes keyed by machine label.
///
/// Entries nobody holds or waits on are dropped on the next acquire, so the
/// table only tracks labels in use.
#[derive(Debug, Default)]
pub struct LabelLocks {
    locks: Mutex<HashMap<MachineLabel, Arc<Mutex<()>>>>,
}

impl LabelLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `label`.
    pub async fn acquire(&self, label: &MachineLabel) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Guards and waiters hold a clone; a count of one means idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(label.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of labels currently tracked.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
