//! PostgreSQL storage for the Collegium activity and messaging core.
//!
//! Implements the store traits of the domain crates on sqlx connection
//! pools:
//!
//! - [`PostgresMessageStore`]: message rows, the thread-key index, the
//!   deleted-index and recent contributions
//! - [`PostgresActivityStore`]: bucketed pending routes, aggregates,
//!   TTL'd stream entries and stream status
//! - [`PostgresInvitationStore`]: invitations and the token index
//!
//! Schemas are created by [`migrations::run_migrations`], which executes the
//! per-module `ensure_schema` functions in one fixed order. Treat that
//! order as load-bearing.
//!
//! Per-row TTLs (stream entries, recent contributions) are modeled as
//! `expires_at` columns: reads filter lapsed rows, and
//! [`maintenance::purge_expired`] reclaims them in the background.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod invitations;
pub mod maintenance;
pub mod messages;
pub mod migrations;

pub use activity::PostgresActivityStore;
pub use invitations::PostgresInvitationStore;
pub use messages::PostgresMessageStore;

use collegium_core::Error;

/// Map a database failure into the platform taxonomy.
pub(crate) fn db_error(err: sqlx::Error) -> Error {
    Error::internal(format!("datastore error: {err}"))
}

/// Map a row (de)serialization failure into the platform taxonomy.
pub(crate) fn codec_error(err: serde_json::Error) -> Error {
    Error::internal(format!("row codec error: {err}"))
}
