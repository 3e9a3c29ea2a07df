//! Per-user advisory locks.
//!
//! Every read-modify-write of a user record runs under that user's lock so a
//! failed-login increment cannot race a concurrent reset redemption. Different
//! users never contend. Entries are pruned once no guard refers to them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl UserLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`. Dropping the guard releases it.
    pub async fn lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(user_id).or_default())
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
