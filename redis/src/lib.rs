//! Redis-backed lock service for the Collegium platform.
//!
//! Implements the [`LockService`] trait from `collegium-core` on a shared
//! Redis: acquisition is `SET key token NX PX ttl`, release is a
//! compare-and-delete script so only the fencing token minted at
//! acquisition can free the key. A crashed holder's lock lapses with the
//! TTL, nothing else required.
//!
//! # Example
//!
//! ```no_run
//! use collegium_redis::RedisLockService;
//! use collegium_core::locking::LockService;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockService::new("redis://127.0.0.1:6379").await?;
//! if let Some(lock) = locks.acquire("activity:collect:0", Duration::from_secs(60)).await? {
//!     // ... one collection cycle ...
//!     locks.release(lock).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use collegium_core::locking::{Lock, LockError, LockService};
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

/// Compare-and-delete: free the key only when the caller still owns it.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// Redis lock service with connection pooling via [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisLockService {
    conn_manager: ConnectionManager,
}

impl RedisLockService {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] when the connection cannot be
    /// established.
    pub async fn new(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Backend(format!("failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{key}")
    }
}

impl LockService for RedisLockService {
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<Option<Lock>, LockError>> {
        let key = key.to_string();
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let token = uuid::Uuid::new_v4().to_string();
            let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

            // SET NX PX: the whole acquisition in one atomic command.
            let response: Option<String> = redis::cmd("SET")
                .arg(Self::lock_key(&key))
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis)
                .query_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("lock acquire failed: {e}")))?;

            match response {
                Some(_) => {
                    tracing::trace!(key = %key, "lock acquired");
                    Ok(Some(Lock { key, token }))
                }
                None => Ok(None),
            }
        })
    }

    fn release(&self, lock: Lock) -> BoxFuture<'_, Result<bool, LockError>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let script = Script::new(RELEASE_SCRIPT);
            let deleted: i64 = script
                .key(Self::lock_key(&lock.key))
                .arg(&lock.token)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("lock release failed: {e}")))?;
            Ok(deleted == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_namespaced() {
        assert_eq!(RedisLockService::lock_key("activity:collect:0"), "lock:activity:collect:0");
    }

    #[test]
    fn redis_lock_service_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisLockService>();
        assert_sync::<RedisLockService>();
    }
}
