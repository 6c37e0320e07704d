//! Testing utilities and in-memory backends for the Collegium platform.
//!
//! Every infrastructure trait in `collegium-core` has an in-memory
//! implementation here so domain crates can exercise full routing,
//! aggregation, collection and push flows without Postgres, Redis or a
//! broker:
//!
//! - [`InMemoryLockService`]: process-local TTL locks
//! - [`InMemoryTaskQueue`]: per-queue FIFO with at-least-once semantics
//! - [`InMemoryTenantDirectory`]: fixed tenant table
//! - [`StaticPermissionsOracle`]: allow/deny-all oracle
//!
//! These are test doubles with real semantics, not mocks that record calls:
//! the lock service genuinely excludes, the queue genuinely buffers.

pub mod locks;
pub mod permissions;
pub mod queue;
pub mod tenants;

pub use locks::InMemoryLockService;
pub use permissions::StaticPermissionsOracle;
pub use queue::InMemoryTaskQueue;
pub use tenants::InMemoryTenantDirectory;

/// Initialize a compact tracing subscriber for tests.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}
