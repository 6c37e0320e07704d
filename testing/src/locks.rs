//! In-memory lock service.

use collegium_core::locking::{Lock, LockError, LockService};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Process-local [`LockService`] with real TTL semantics.
///
/// Lapsed locks are reclaimed on the next acquisition attempt, the same
/// observable behavior a KV-store TTL gives a crashed holder.
#[derive(Default)]
pub struct InMemoryLockService {
    locks: Mutex<HashMap<String, HeldLock>>,
    token_counter: AtomicU64,
}

struct HeldLock {
    token: String,
    expires_at: Instant,
}

impl InMemoryLockService {
    /// Create an empty lock service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently held (non-lapsed) locks.
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        self.locks
            .lock()
            .await
            .values()
            .filter(|held| held.expires_at > now)
            .count()
    }
}

impl LockService for InMemoryLockService {
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<Option<Lock>, LockError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut locks = self.locks.lock().await;
            let now = Instant::now();
            if let Some(held) = locks.get(&key) {
                if held.expires_at > now {
                    return Ok(None);
                }
            }
            let token = format!("tok-{}", self.token_counter.fetch_add(1, Ordering::SeqCst));
            locks.insert(
                key.clone(),
                HeldLock {
                    token: token.clone(),
                    expires_at: now + ttl,
                },
            );
            Ok(Some(Lock { key, token }))
        })
    }

    fn release(&self, lock: Lock) -> BoxFuture<'_, Result<bool, LockError>> {
        Box::pin(async move {
            let mut locks = self.locks.lock().await;
            match locks.get(&lock.key) {
                Some(held) if held.token == lock.token => {
                    locks.remove(&lock.key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_excludes_second_holder() {
        let svc = InMemoryLockService::new();
        let ttl = Duration::from_secs(5);

        let lock = svc.acquire("b:0", ttl).await.expect("backend ok");
        assert!(lock.is_some());
        let second = svc.acquire("b:0", ttl).await.expect("backend ok");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let svc = InMemoryLockService::new();
        let ttl = Duration::from_secs(5);

        let lock = svc
            .acquire("b:1", ttl)
            .await
            .expect("backend ok")
            .expect("acquired");
        assert!(svc.release(lock).await.expect("backend ok"));
        assert!(svc.acquire("b:1", ttl).await.expect("backend ok").is_some());
    }

    #[tokio::test]
    async fn lapsed_lock_is_reclaimable() {
        let svc = InMemoryLockService::new();
        let lock = svc
            .acquire("b:2", Duration::from_millis(10))
            .await
            .expect("backend ok")
            .expect("acquired");

        tokio::time::sleep(Duration::from_millis(25)).await;

        let reclaimed = svc
            .acquire("b:2", Duration::from_secs(5))
            .await
            .expect("backend ok");
        assert!(reclaimed.is_some(), "lapsed lock should be reclaimable");

        // The old fencing token no longer releases anything.
        assert!(!svc.release(lock).await.expect("backend ok"));
    }

    #[tokio::test]
    async fn release_with_foreign_token_is_a_noop() {
        let svc = InMemoryLockService::new();
        let _held = svc
            .acquire("b:3", Duration::from_secs(5))
            .await
            .expect("backend ok")
            .expect("acquired");

        let forged = Lock {
            key: "b:3".to_string(),
            token: "tok-forged".to_string(),
        };
        assert!(!svc.release(forged).await.expect("backend ok"));
        assert_eq!(svc.held_count().await, 1);
    }
}
