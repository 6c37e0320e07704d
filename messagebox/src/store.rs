//! Message storage abstraction.
//!
//! The column families behind a box:
//!
//! - message rows keyed by `(message_box_id, created)`
//! - a thread-key index keyed by `(message_box_id, thread_key)`, always read
//!   in reverse lexicographic order
//! - a deleted-index (tombstones) keyed by `(message_box_id, created)`
//! - a recent-contributions index keyed by `(message_box_id, contributor)`
//!   with a sliding per-row TTL
//!
//! The service layer owns all invariants; the store only moves rows.

use crate::model::Message;
use crate::thread_key::ThreadKey;
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;

/// Storage operations for message boxes.
pub trait MessageStore: Send + Sync {
    /// Insert a message row.
    fn insert_message(&self, message: &Message) -> BoxFuture<'_, Result<()>>;

    /// Fetch a message row by `(box, created)`.
    fn get_message(
        &self,
        message_box_id: &str,
        created: i64,
    ) -> BoxFuture<'_, Result<Option<Message>>>;

    /// Replace the body of a message row.
    fn update_body(
        &self,
        message_box_id: &str,
        created: i64,
        body: &str,
    ) -> BoxFuture<'_, Result<()>>;

    /// Set the soft-delete timestamp on a message row.
    fn mark_deleted(
        &self,
        message_box_id: &str,
        created: i64,
        deleted_at: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Insert a thread-key index row.
    fn index_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
        created: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Remove a thread-key index row.
    fn remove_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
    ) -> BoxFuture<'_, Result<()>>;

    /// Page the thread-key index in reverse lexicographic order.
    ///
    /// `start` is exclusive (the last key of the previous page); `None`
    /// starts at the top.
    fn page_thread_keys(
        &self,
        message_box_id: &str,
        start: Option<&ThreadKey>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ThreadKey>>>;

    /// The thread key immediately after `thread_key` in the reversed read,
    /// if any. Drives the leaf-delete descendant probe.
    fn next_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
    ) -> BoxFuture<'_, Result<Option<ThreadKey>>>;

    /// Insert a tombstone into the deleted-index.
    fn insert_tombstone(
        &self,
        message_box_id: &str,
        created: i64,
        message: &Message,
    ) -> BoxFuture<'_, Result<()>>;

    /// Upsert a recent-contribution row, resetting its TTL.
    fn upsert_recent_contribution(
        &self,
        message_box_id: &str,
        contributor: &PrincipalId,
        contributed_at: i64,
        expires_at: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Most-recent-first page of non-expired contributors.
    ///
    /// `start` is the exclusive paging offset into the reversed index.
    fn recent_contributions(
        &self,
        message_box_id: &str,
        start: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PrincipalId>>>;
}
