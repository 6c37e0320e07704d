//! # Collegium Core
//!
//! Core traits and types for the Collegium activity and messaging platform.
//!
//! Collegium is the activity/messaging subsystem of a multi-tenant academic
//! collaboration platform: it turns resource-mutation events into ordered,
//! aggregated, per-recipient activity streams, notifications and real-time
//! pushes. This crate holds the pieces every other crate builds on:
//!
//! - [`error`]: the platform-wide error taxonomy with HTTP-ish codes
//! - [`principal`]: opaque user/group identifiers and resource references
//! - [`tenant`]: tenants, tenant privacy and the tenant directory oracle
//! - [`context`]: the per-request execution context
//! - [`emitter`]: typed in-process publish/subscribe with `on`/`when` handlers
//! - [`locking`]: short-TTL named locks backed by a shared KV store
//! - [`queue`]: durable task queue abstraction with at-least-once delivery
//! - [`signing`]: HMAC resource signatures for socket auth and access tokens
//! - [`config`]: typed configuration with builder-style setters
//!
//! # Key Principles
//!
//! - **Traits at the seams**: backends (Postgres, Redis, Kafka) implement the
//!   traits defined here; domain crates never name a backend directly.
//! - **Dyn compatibility**: infrastructure traits return
//!   [`futures::future::BoxFuture`] so handles can be shared as `Arc<dyn _>`.
//! - **Write-once globals**: emitters, registries and client handles are built
//!   during startup and never rewritten afterwards.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;

pub mod access;
pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod locking;
pub mod principal;
pub mod queue;
pub mod signing;
pub mod tenant;

pub use error::{Error, Result};

/// Current time as milliseconds since the Unix epoch.
///
/// All timestamps in the platform (message creation, activity publication,
/// aggregate bookkeeping) use this resolution.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
