//! Per-user mutual exclusion for read-modify-write cycles on stored state.
//!
//! Different users never contend. The lock is held only while the
//! orchestrator loads, transitions and persists one user's context; it is
//! never held across the debounce wait or a downstream search.

use std::collections::HashMap;
use std::sync::Arc;

use jobhive_schema::UserId;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};

#[derive(Clone, Default)]
pub struct UserLockManager {
    locks: Arc<Mutex<HashMap<UserId, Arc<Semaphore>>>>,
}

impl UserLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn semaphore_for(&self, user_id: &UserId) -> Arc<Semaphore> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Wait for exclusive access to a user's state.
    pub async fn acquire(&self, user_id: &UserId) -> Result<UserLockGuard, AcquireError> {
        let permit = self.semaphore_for(user_id).await.acquire_owned().await?;
        Ok(UserLockGuard { _permit: permit })
    }

    /// Drop semaphores nobody holds or waits on. Returns how many were removed.
    pub async fn cleanup_unused(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, sem| Arc::strong_count(sem) > 1);
        before - locks.len()
    }
}

/// Releases the user's lock when dropped.
pub struct UserLockGuard {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sequential_access() {
        let manager = UserLockManager::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let user = UserId::new("1");

        let counter1 = counter.clone();
        let manager1 = manager.clone();
        let user1 = user.clone();
        let t1 = tokio::spawn(async move {
            let _guard = manager1.acquire(&user1).await.unwrap();
            counter1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter1.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let counter2 = counter.clone();
        let manager2 = manager.clone();
        let t2 = tokio::spawn(async move {
            let _guard = manager2.acquire(&user).await.unwrap();
            // Should only run after t1 completes
            assert!(counter2.load(Ordering::SeqCst) >= 2);
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_different_users_parallel() {
        let manager = UserLockManager::new();
        let _held = manager.acquire(&UserId::new("1")).await.unwrap();

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(&UserId::new("2")),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_same_user_waits_until_release() {
        let manager = UserLockManager::new();
        let user = UserId::new("1");

        let held = manager.acquire(&user).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), manager.acquire(&user)).await;
        assert!(blocked.is_err());

        drop(held);
        let next = tokio::time::timeout(Duration::from_millis(50), manager.acquire(&user)).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_held_locks() {
        let manager = UserLockManager::new();
        let held = manager.acquire(&UserId::new("held")).await.unwrap();
        drop(manager.acquire(&UserId::new("idle")).await.unwrap());

        assert_eq!(manager.cleanup_unused().await, 1);
        let still_held = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(&UserId::new("held")),
        )
        .await;
        assert!(still_held.is_err());
        drop(held);
    }
}
