//! In-memory message store for tests.

use crate::model::Message;
use crate::store::MessageStore;
use crate::thread_key::ThreadKey;
use collegium_core::principal::PrincipalId;
use collegium_core::{Result, now_millis};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// [`MessageStore`] backed by maps, with a genuinely ordered thread-key
/// index so pagination and the leaf-delete probe behave like the real
/// clustered reads.
#[derive(Default)]
pub struct InMemoryMessageStore {
    boxes: Mutex<HashMap<String, BoxState>>,
}

#[derive(Default)]
struct BoxState {
    messages: HashMap<i64, Message>,
    /// thread key → created, ascending; reads walk it reversed.
    index: BTreeMap<String, i64>,
    tombstones: HashMap<i64, Message>,
    /// contributor → (contributed at, expires at).
    contributions: HashMap<String, (i64, i64)>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tombstones in a box.
    pub async fn tombstone_count(&self, message_box_id: &str) -> usize {
        self.boxes
            .lock()
            .await
            .get(message_box_id)
            .map_or(0, |b| b.tombstones.len())
    }
}

impl MessageStore for InMemoryMessageStore {
    fn insert_message(&self, message: &Message) -> BoxFuture<'_, Result<()>> {
        let message = message.clone();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            let state = boxes.entry(message.message_box_id.clone()).or_default();
            state.messages.insert(message.created, message);
            Ok(())
        })
    }

    fn get_message(
        &self,
        message_box_id: &str,
        created: i64,
    ) -> BoxFuture<'_, Result<Option<Message>>> {
        let message_box_id = message_box_id.to_string();
        Box::pin(async move {
            let boxes = self.boxes.lock().await;
            Ok(boxes
                .get(&message_box_id)
                .and_then(|b| b.messages.get(&created))
                .cloned())
        })
    }

    fn update_body(
        &self,
        message_box_id: &str,
        created: i64,
        body: &str,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        let body = body.to_string();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            if let Some(message) = boxes
                .get_mut(&message_box_id)
                .and_then(|b| b.messages.get_mut(&created))
            {
                message.body = Some(body);
            }
            Ok(())
        })
    }

    fn mark_deleted(
        &self,
        message_box_id: &str,
        created: i64,
        deleted_at: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            if let Some(message) = boxes
                .get_mut(&message_box_id)
                .and_then(|b| b.messages.get_mut(&created))
            {
                message.deleted = Some(deleted_at);
            }
            Ok(())
        })
    }

    fn index_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
        created: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        let thread_key = thread_key.clone();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            let state = boxes.entry(message_box_id).or_default();
            state.index.insert(thread_key.as_str().to_string(), created);
            Ok(())
        })
    }

    fn remove_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        let thread_key = thread_key.clone();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            if let Some(state) = boxes.get_mut(&message_box_id) {
                state.index.remove(thread_key.as_str());
            }
            Ok(())
        })
    }

    fn page_thread_keys(
        &self,
        message_box_id: &str,
        start: Option<&ThreadKey>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ThreadKey>>> {
        let message_box_id = message_box_id.to_string();
        let start = start.cloned();
        Box::pin(async move {
            let boxes = self.boxes.lock().await;
            let Some(state) = boxes.get(&message_box_id) else {
                return Ok(Vec::new());
            };
            let raw: Vec<String> = match &start {
                Some(token) => state
                    .index
                    .range(..token.as_str().to_string())
                    .rev()
                    .take(limit)
                    .map(|(k, _)| k.clone())
                    .collect(),
                None => state
                    .index
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|(k, _)| k.clone())
                    .collect(),
            };
            raw.into_iter().map(ThreadKey::parse).collect()
        })
    }

    fn next_thread_key(
        &self,
        message_box_id: &str,
        thread_key: &ThreadKey,
    ) -> BoxFuture<'_, Result<Option<ThreadKey>>> {
        let message_box_id = message_box_id.to_string();
        let thread_key = thread_key.clone();
        Box::pin(async move {
            let boxes = self.boxes.lock().await;
            let Some(state) = boxes.get(&message_box_id) else {
                return Ok(None);
            };
            state
                .index
                .range(..thread_key.as_str().to_string())
                .next_back()
                .map(|(k, _)| ThreadKey::parse(k.clone()))
                .transpose()
        })
    }

    fn insert_tombstone(
        &self,
        message_box_id: &str,
        created: i64,
        message: &Message,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        let message = message.clone();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            let state = boxes.entry(message_box_id).or_default();
            state.tombstones.insert(created, message);
            Ok(())
        })
    }

    fn upsert_recent_contribution(
        &self,
        message_box_id: &str,
        contributor: &PrincipalId,
        contributed_at: i64,
        expires_at: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let message_box_id = message_box_id.to_string();
        let contributor = contributor.clone();
        Box::pin(async move {
            let mut boxes = self.boxes.lock().await;
            let state = boxes.entry(message_box_id).or_default();
            state
                .contributions
                .insert(contributor.as_str().to_string(), (contributed_at, expires_at));
            Ok(())
        })
    }

    fn recent_contributions(
        &self,
        message_box_id: &str,
        start: usize,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<PrincipalId>>> {
        let message_box_id = message_box_id.to_string();
        Box::pin(async move {
            let boxes = self.boxes.lock().await;
            let Some(state) = boxes.get(&message_box_id) else {
                return Ok(Vec::new());
            };
            let now = now_millis();
            let mut live: Vec<(&String, &(i64, i64))> = state
                .contributions
                .iter()
                .filter(|(_, (_, expires_at))| *expires_at > now)
                .collect();
            live.sort_by(|a, b| b.1.0.cmp(&a.1.0));
            live.into_iter()
                .skip(start)
                .take(limit)
                .map(|(id, _)| PrincipalId::parse(id.clone()))
                .collect()
        })
    }
}
