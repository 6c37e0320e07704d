//! In-memory activity store and a collecting sink for tests.

use crate::model::{Format, RoutedActivity, StreamEntry, StreamType};
use crate::sinks::{Delivery, DeliverySink};
use crate::store::{ActivityStore, AggregateStatus};
use collegium_core::principal::PrincipalId;
use collegium_core::{Result, now_millis};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// [`ActivityStore`] backed by maps, TTL semantics included.
#[derive(Default)]
pub struct InMemoryActivityStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    pending: HashMap<u32, Vec<(u64, RoutedActivity)>>,
    aggregates: HashMap<(PrincipalId, StreamType, String), AggregateStatus>,
    entries: HashMap<(PrincipalId, StreamType, Format, String), (StreamEntry, i64)>,
    status: HashMap<(PrincipalId, StreamType), i64>,
}

impl InMemoryActivityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending entries in a bucket.
    pub async fn pending_depth(&self, bucket: u32) -> usize {
        self.state
            .lock()
            .await
            .pending
            .get(&bucket)
            .map_or(0, Vec::len)
    }

    /// Rewrite an aggregate's bookkeeping timestamps; expiry tests use this
    /// instead of a clock.
    pub async fn age_aggregate(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        group_key: &str,
        created: i64,
        updated: i64,
    ) {
        let mut state = self.state.lock().await;
        if let Some(status) =
            state
                .aggregates
                .get_mut(&(recipient.clone(), stream_type, group_key.to_string()))
        {
            status.created = created;
            status.updated = updated;
        }
    }

    /// Every stored group key of a recipient's stream.
    pub async fn group_keys(&self, recipient: &PrincipalId, stream_type: StreamType) -> Vec<String> {
        self.state
            .lock()
            .await
            .aggregates
            .keys()
            .filter(|(r, s, _)| r == recipient && *s == stream_type)
            .map(|(_, _, key)| key.clone())
            .collect()
    }
}

impl ActivityStore for InMemoryActivityStore {
    fn append_pending(&self, bucket: u32, route: &RoutedActivity) -> BoxFuture<'_, Result<()>> {
        let route = route.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.pending.entry(bucket).or_default().push((seq, route));
            Ok(())
        })
    }

    fn read_pending(
        &self,
        bucket: u32,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<(u64, RoutedActivity)>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .pending
                .get(&bucket)
                .map(|entries| entries.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn delete_pending(&self, bucket: u32, seqs: &[u64]) -> BoxFuture<'_, Result<()>> {
        let seqs: Vec<u64> = seqs.to_vec();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(entries) = state.pending.get_mut(&bucket) {
                entries.retain(|(seq, _)| !seqs.contains(seq));
            }
            Ok(())
        })
    }

    fn get_aggregate(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        group_key: &str,
    ) -> BoxFuture<'_, Result<Option<AggregateStatus>>> {
        let key = (recipient.clone(), stream_type, group_key.to_string());
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.aggregates.get(&key).cloned())
        })
    }

    fn put_aggregate(&self, status: &AggregateStatus) -> BoxFuture<'_, Result<()>> {
        let status = status.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.aggregates.insert(
                (
                    status.recipient_id.clone(),
                    status.stream_type,
                    status.group_key.clone(),
                ),
                status,
            );
            Ok(())
        })
    }

    fn delete_aggregates(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> BoxFuture<'_, Result<()>> {
        let recipient = recipient.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .aggregates
                .retain(|(r, s, _), _| !(*r == recipient && *s == stream_type));
            Ok(())
        })
    }

    fn put_stream_entry(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        format: Format,
        entry: &StreamEntry,
        expires_at: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let key = (
            recipient.clone(),
            stream_type,
            format,
            entry.activity_id.clone(),
        );
        let entry = entry.clone();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.entries.insert(key, (entry, expires_at));
            Ok(())
        })
    }

    fn get_stream(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        format: Format,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<StreamEntry>>> {
        let recipient = recipient.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            let now = now_millis();
            let mut entries: Vec<StreamEntry> = state
                .entries
                .iter()
                .filter(|((r, s, f, _), (_, expires_at))| {
                    *r == recipient && *s == stream_type && *f == format && *expires_at > now
                })
                .map(|(_, (entry, _))| entry.clone())
                .collect();
            entries.sort_by(|a, b| b.published.cmp(&a.published));
            entries.truncate(limit);
            Ok(entries)
        })
    }

    fn get_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> BoxFuture<'_, Result<i64>> {
        let key = (recipient.clone(), stream_type);
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.status.get(&key).copied().unwrap_or(0))
        })
    }

    fn set_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        num_new: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let key = (recipient.clone(), stream_type);
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.status.insert(key, num_new);
            Ok(())
        })
    }
}

/// A sink that records everything it is handed.
#[derive(Default)]
pub struct CollectingSink {
    streams: Option<Vec<StreamType>>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl CollectingSink {
    /// Sink consuming every stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink consuming only the given streams.
    #[must_use]
    pub fn for_streams(streams: Vec<StreamType>) -> Self {
        Self {
            streams: Some(streams),
            deliveries: Arc::default(),
        }
    }

    /// Everything delivered so far.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }
}

impl DeliverySink for CollectingSink {
    fn handles(&self, stream_type: StreamType) -> bool {
        self.streams
            .as_ref()
            .is_none_or(|streams| streams.contains(&stream_type))
    }

    fn deliver(&self, delivery: &Delivery) -> BoxFuture<'_, Result<()>> {
        let delivery = delivery.clone();
        Box::pin(async move {
            self.deliveries.lock().await.push(delivery);
            Ok(())
        })
    }
}
