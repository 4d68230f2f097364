//! Per-user write serialization
//!
//! Only covers writers inside this process. Writers in other processes still
//! race; the store's atomic increment and conditional grant cover those.

use std::collections::HashMap;
use std::sync::Arc;

use metamind_shared::UserId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while a user's profile row is being written
pub type UserLockGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `user_id`'s profile
    pub async fn lock(&self, user_id: UserId) -> UserLockGuard {
        let user_lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id).or_default().clone()
        };
        user_lock.lock_owned().await
    }

    /// Number of users with a held or awaited lock
    pub async fn active(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let locks = UserLocks::new();
        let user = UserId::new();

        let guard = locks.lock(user).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(user)).await;
        assert!(second.is_err(), "second lock should wait while the first is held");

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock(user)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.lock(UserId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(UserId::new())).await;
        assert!(b.is_ok());
        assert_eq!(locks.active().await, 2);
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = UserLocks::new();
        drop(locks.lock(UserId::new()).await);
        drop(locks.lock(UserId::new()).await);
        assert_eq!(locks.active().await, 0);
        assert!(locks.locks.lock().await.len() <= 1);
    }
}
