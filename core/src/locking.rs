//! Short-TTL named locks backed by a shared KV store.
//!
//! Locks serve two jobs in the platform: timestamp uniqueness when messages
//! are created, and mutual exclusion of collection cycles on a bucket. Both
//! are short-lived; the TTL is the crash-recovery story, not a lease to be
//! renewed.
//!
//! Acquisition is non-blocking: [`LockService::acquire`] returns `None` when
//! the lock is held elsewhere and the caller decides whether to skip (bucket
//! collectors) or retry under a different key (timestamp locks).

use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// Errors from the lock backend.
#[derive(Debug, Error, Clone)]
pub enum LockError {
    /// The KV store behind the locks could not be reached.
    #[error("lock backend unavailable: {0}")]
    Backend(String),
}

impl From<LockError> for crate::Error {
    fn from(err: LockError) -> Self {
        Self::transient(err.to_string())
    }
}

/// A held lock.
///
/// Carries the fencing token that proves ownership at release time; releasing
/// with a stale token after TTL expiry is a no-op, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// The lock name.
    pub key: String,
    /// Fencing token minted at acquisition.
    pub token: String,
}

/// Cluster-visible named locks.
///
/// Implementations must guarantee that at most one holder owns a key at a
/// time and that ownership lapses after the TTL without any cooperation from
/// a crashed holder.
pub trait LockService: Send + Sync {
    /// Try to acquire `key` for `ttl`.
    ///
    /// Returns `Ok(Some(lock))` when acquired, `Ok(None)` when the key is
    /// currently held elsewhere.
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<Option<Lock>, LockError>>;

    /// Release a held lock.
    ///
    /// Returns `Ok(true)` when this call released the lock, `Ok(false)` when
    /// the lock had already lapsed or was taken over after TTL expiry.
    fn release(&self, lock: Lock) -> BoxFuture<'_, Result<bool, LockError>>;
}
