//! Named-lock registry for fingerprint and item-UUID locking (spec §5,
//! §4.7 "fingerprint lock"). In-process only; a cache-backed lease is the
//! documented multi-worker alternative (spec §5) but is out of scope here
//! since this deployment model is single-node (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct FingerprintLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the named lock, creating it on first use. Held until the
    /// returned guard is dropped.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes_access() {
        let locks = Arc::new(FingerprintLocks::new());
        let l1 = Arc::clone(&locks);
        let guard = l1.acquire("x").await;
        let l2 = Arc::clone(&locks);
        let handle = tokio::spawn(async move {
            let _g = l2.acquire("x").await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }
}
