//! Activity storage abstraction.
//!
//! Four row families:
//!
//! - bucketed pending routes, appended by the router and drained by
//!   collection cycles
//! - aggregate status rows keyed by `(recipient, stream, group key)`
//! - stream entries keyed by `(recipient, stream, format, activity id)` with
//!   a TTL
//! - per-stream status (the unseen counter) keyed by `(recipient, stream)`

use crate::model::{PersistentActivityEntity, RoutedActivity, StreamEntry, StreamType};
use crate::registry::GroupBySpec;
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// The live state of one aggregate.
///
/// Role entities are kept in insertion order and de-duplicated by id; on a
/// `published` tie the already-stored entity wins, which falls out of the
/// union-by-id merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatus {
    /// The recipient this aggregate belongs to.
    pub recipient_id: PrincipalId,
    /// The recipient's stream.
    pub stream_type: StreamType,
    /// The grouping key equating activities into this aggregate.
    pub group_key: String,
    /// Which roles the key was built from; the others collapse into
    /// collections on merge.
    pub keyed_roles: GroupBySpec,
    /// Id of the materialized stream entry; stable across merges.
    pub activity_id: String,
    /// The activity type.
    pub activity_type: String,
    /// The verb.
    pub verb: String,
    /// Newest merged publication timestamp.
    pub published: i64,
    /// When the aggregate was created, milliseconds.
    pub created: i64,
    /// When the aggregate last absorbed a seed, milliseconds.
    pub updated: i64,
    /// Actor entities, insertion-ordered, de-duplicated.
    pub actors: Vec<PersistentActivityEntity>,
    /// Object entities.
    pub objects: Vec<PersistentActivityEntity>,
    /// Target entities.
    pub targets: Vec<PersistentActivityEntity>,
}

/// Storage operations for the activity machinery.
pub trait ActivityStore: Send + Sync {
    /// Append a routed activity to a bucket's pending queue.
    fn append_pending(
        &self,
        bucket: u32,
        route: &RoutedActivity,
    ) -> BoxFuture<'_, Result<()>>;

    /// Read up to `limit` pending entries of a bucket, oldest first, with
    /// their queue sequence numbers.
    fn read_pending(
        &self,
        bucket: u32,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<(u64, RoutedActivity)>>>;

    /// Delete drained pending entries by sequence number.
    fn delete_pending(&self, bucket: u32, seqs: &[u64]) -> BoxFuture<'_, Result<()>>;

    /// Fetch an aggregate by `(recipient, stream, group key)`.
    fn get_aggregate(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        group_key: &str,
    ) -> BoxFuture<'_, Result<Option<AggregateStatus>>>;

    /// Insert or replace an aggregate.
    fn put_aggregate(&self, status: &AggregateStatus) -> BoxFuture<'_, Result<()>>;

    /// Drop every aggregate of a recipient's stream (acknowledgment reset).
    fn delete_aggregates(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> BoxFuture<'_, Result<()>>;

    /// Insert or replace a stream entry with its expiry.
    fn put_stream_entry(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        format: crate::model::Format,
        entry: &StreamEntry,
        expires_at: i64,
    ) -> BoxFuture<'_, Result<()>>;

    /// Newest-first page of non-expired entries of a stream.
    fn get_stream(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        format: crate::model::Format,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StreamEntry>>>;

    /// The unseen counter of a recipient's stream.
    fn get_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> BoxFuture<'_, Result<i64>>;

    /// Set the unseen counter of a recipient's stream.
    fn set_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        num_new: i64,
    ) -> BoxFuture<'_, Result<()>>;
}
