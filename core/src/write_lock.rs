//! Cooperative single-writer lock over the metadata storage namespace.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use vault_object_store::ObjectStore;
use vault_utils::time::millis_since_epoch;

/// Lock file location inside the store.
pub const WRITE_LOCK_PATH: &str = ".db/write.lock";

/// Backoff unit between acquisition attempts; attempt `n` waits `n` units.
const BACKOFF_STEP: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct WriteLock {
    store: Arc<dyn ObjectStore>,
    path: String,
}

impl WriteLock {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            path: WRITE_LOCK_PATH.to_string(),
        }
    }

    /// Tries to take the lock for `session_id`, retrying with linearly
    /// growing backoff. Returns `false` when every attempt found the lock
    /// held; the current owner and lock age are logged in that case.
    pub async fn acquire(&self, session_id: &str, max_attempts: usize) -> anyhow::Result<bool> {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.store.acquire_write_lock(&self.path, session_id).await? {
                vault_logs::debug!("session {session_id} acquired the write lock");
                return Ok(true);
            }
            if attempt < max_attempts {
                let delay = BACKOFF_STEP * attempt as u32;
                vault_logs::info!(
                    "write lock busy (attempt {attempt}/{max_attempts}); \
                     waiting {delay:?}"
                );
                sleep(delay).await;
            }
        }

        match self.store.check_write_lock(&self.path).await? {
            Some(holder) => {
                let age_ms = millis_since_epoch().saturating_sub(holder.acquired_at);
                vault_logs::warn!(
                    "failed to take the write lock: held by {} for {age_ms} ms",
                    holder.owner
                );
            }
            None => {
                // The holder released between the last attempt and the check.
                vault_logs::warn!("failed to take the write lock; it is now free");
            }
        }
        Ok(false)
    }

    /// Extends the holder's claim by bumping the lock timestamp.
    pub async fn refresh(&self, session_id: &str) -> anyhow::Result<()> {
        self.store.refresh_write_lock(&self.path, session_id).await?;
        Ok(())
    }

    /// Best-effort release; failure is logged, never propagated, so release
    /// can run on every exit path.
    pub async fn release(&self) {
        if let Err(err) = self.store.release_write_lock(&self.path).await {
            vault_logs::error!("failed to release the write lock: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use vault_object_store::MockStore;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_release_cycle() {
        let store: Arc<dyn ObjectStore> = Arc::new(MockStore::default());
        let lock = WriteLock::new(Arc::clone(&store));

        assert!(lock.acquire("session-1", 1).await.unwrap());
        // A second session backs off and gives up.
        assert!(!lock.acquire("session-2", 3).await.unwrap());

        lock.release().await;
        assert!(lock.acquire("session-2", 1).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_bumps_the_timestamp() {
        let store: Arc<dyn ObjectStore> = Arc::new(MockStore::default());
        let lock = WriteLock::new(Arc::clone(&store));
        assert!(lock.acquire("session-1", 1).await.unwrap());

        let before = store.check_write_lock(WRITE_LOCK_PATH).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        lock.refresh("session-1").await.unwrap();
        let after = store.check_write_lock(WRITE_LOCK_PATH).await.unwrap().unwrap();
        assert_eq!(after.owner, "session-1");
        assert!(after.acquired_at >= before.acquired_at);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store: Arc<dyn ObjectStore> = Arc::new(MockStore::default());
        let lock = WriteLock::new(store);
        lock.release().await;
        assert!(lock.acquire("s", 1).await.unwrap());
        lock.release().await;
        lock.release().await;
    }
}
