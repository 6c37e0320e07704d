//! The message box service.
//!
//! All invariants live here: timestamp uniqueness under lock, thread-key
//! derivation, the delete pipeline, body rewriting and recent-contributor
//! tracking. The store below only moves rows.

use crate::events::MessageBoxEvent;
use crate::model::{DeleteType, Message};
use crate::store::MessageStore;
use crate::thread_key::ThreadKey;
use crate::urls::rewrite_local_urls;
use collegium_core::context::Context;
use collegium_core::emitter::Emitter;
use collegium_core::locking::LockService;
use collegium_core::tenant::TenantDirectory;
use collegium_core::{Error, Result, now_millis};
use std::sync::Arc;
use std::time::Duration;

/// TTL of a unique-timestamp lock. Long enough to cover the two inserts, no
/// longer.
const CREATED_LOCK_TTL: Duration = Duration::from_secs(2);

/// Bound on timestamp-advance retries before surfacing a transient error.
const MAX_CREATED_ATTEMPTS: u32 = 25;

/// Sliding TTL of a recent-contribution row: 30 days, milliseconds.
const CONTRIBUTION_TTL_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Threaded message storage with ordered thread keys, delete-type policy and
/// URL rewriting.
pub struct MessageBox {
    store: Arc<dyn MessageStore>,
    locks: Arc<dyn LockService>,
    tenants: Arc<dyn TenantDirectory>,
    emitter: Arc<Emitter<MessageBoxEvent>>,
}

impl MessageBox {
    /// Assemble the service from its backends.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        locks: Arc<dyn LockService>,
        tenants: Arc<dyn TenantDirectory>,
    ) -> Self {
        Self {
            store,
            locks,
            tenants,
            emitter: Arc::new(Emitter::new("messagebox")),
        }
    }

    /// The event emitter; listeners register at startup.
    #[must_use]
    pub fn emitter(&self) -> &Arc<Emitter<MessageBoxEvent>> {
        &self.emitter
    }

    /// Create a message.
    ///
    /// When `reply_to_created` is given it must be the creation timestamp of
    /// an existing message in the box and lie in the past; the new message
    /// nests below it. The chosen `created` is made unique via a short-TTL
    /// lock keyed by the parent thread key (or the box id for roots); on
    /// contention the candidate timestamp advances by one millisecond and
    /// the acquisition retries, bounded.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an empty body or a future `reply_to_created`,
    /// [`Error::Unauthorized`] for an anonymous context,
    /// [`Error::NotFound`] when the reply target does not exist,
    /// [`Error::Transient`] when no unique timestamp could be locked.
    pub async fn create_message(
        &self,
        ctx: &Context,
        message_box_id: &str,
        body: &str,
        reply_to_created: Option<i64>,
    ) -> Result<Message> {
        let created_by = ctx.require_user()?.clone();
        if message_box_id.is_empty() {
            return Err(Error::validation("a message box id is required"));
        }
        if body.trim().is_empty() {
            return Err(Error::validation("a message body is required"));
        }

        let parent_key = match reply_to_created {
            Some(reply_to) => {
                if reply_to > now_millis() {
                    return Err(Error::validation("replyTo timestamp lies in the future"));
                }
                let parent = self
                    .store
                    .get_message(message_box_id, reply_to)
                    .await?
                    .ok_or_else(|| {
                        Error::not_found(format!(
                            "no message {reply_to} in box {message_box_id}"
                        ))
                    })?;
                Some(parent.thread_key)
            }
            None => None,
        };

        let lock_scope = parent_key
            .as_ref()
            .map_or(message_box_id, ThreadKey::as_str);
        let (created, lock) = self
            .lock_unique_created(message_box_id, lock_scope, now_millis())
            .await?;

        let thread_key = match &parent_key {
            Some(parent) => ThreadKey::reply(parent, created),
            None => ThreadKey::root(created),
        };
        let rewritten = rewrite_local_urls(body, self.tenants.as_ref());
        let message = Message::new(message_box_id, thread_key, created_by.clone(), rewritten);

        let inserted = self.insert_rows(&message).await;
        if let Err(released) = self.locks.release(lock).await {
            tracing::debug!(error = %released, "unique-timestamp lock release failed");
        }
        inserted?;

        // The contributor index is best-effort: a failed upsert must not
        // fail the create.
        let expires_at = created + CONTRIBUTION_TTL_MILLIS;
        if let Err(error) = self
            .store
            .upsert_recent_contribution(message_box_id, &created_by, created, expires_at)
            .await
        {
            tracing::warn!(%error, message_box_id, "recent-contribution upsert failed");
        }

        metrics::counter!("messagebox.created").increment(1);
        tracing::debug!(
            message_box_id,
            created,
            level = message.level,
            "message created"
        );

        let errors = self
            .emitter
            .emit(MessageBoxEvent::Created {
                message_box_id: message_box_id.to_string(),
                message: message.clone(),
            })
            .await;
        for error in errors {
            tracing::warn!(%error, "message-created listener failed");
        }

        Ok(message)
    }

    /// Replace a message body, re-running URL rewriting. Thread key and
    /// `created` are never touched.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an empty body, [`Error::NotFound`] when the
    /// message does not exist.
    pub async fn update_message_body(
        &self,
        message_box_id: &str,
        created: i64,
        new_body: &str,
    ) -> Result<()> {
        if new_body.trim().is_empty() {
            return Err(Error::validation("a message body is required"));
        }
        self.store
            .get_message(message_box_id, created)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no message {created} in box {message_box_id}"))
            })?;

        let rewritten = rewrite_local_urls(new_body, self.tenants.as_ref());
        self.store
            .update_body(message_box_id, created, &rewritten)
            .await?;

        self.emitter
            .emit_detached(MessageBoxEvent::Updated {
                message_box_id: message_box_id.to_string(),
                created,
            });
        Ok(())
    }

    /// Page messages in thread order: newest root first, each subtree nested
    /// directly under its root.
    ///
    /// `start` is the exclusive continuation token from the previous page.
    /// With `scrub_deleted` (the default at the API surface), deleted
    /// messages keep only identity and position. Returns the page and the
    /// continuation token, present when the page was full.
    ///
    /// # Errors
    ///
    /// Propagates store failures as [`Error::Internal`].
    pub async fn get_messages_from_message_box(
        &self,
        message_box_id: &str,
        start: Option<&ThreadKey>,
        limit: usize,
        scrub_deleted: bool,
    ) -> Result<(Vec<Message>, Option<ThreadKey>)> {
        let keys = self
            .store
            .page_thread_keys(message_box_id, start, limit)
            .await?;
        let next_token = (!keys.is_empty() && keys.len() == limit)
            .then(|| keys.last().cloned())
            .flatten();

        let mut messages = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(message) = self.store.get_message(message_box_id, key.created()).await?
            else {
                tracing::warn!(message_box_id, key = %key, "thread-key index points at a missing row");
                continue;
            };
            if message.is_deleted() && scrub_deleted {
                messages.push(message.scrubbed());
            } else {
                messages.push(message);
            }
        }
        Ok((messages, next_token))
    }

    /// Delete a message.
    ///
    /// Returns the delete type that actually occurred (relevant for
    /// [`DeleteType::Leaf`], which resolves to hard when the message has no
    /// descendants and soft otherwise), together with the surviving scrubbed
    /// message for soft deletes.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the message does not exist.
    pub async fn delete_message(
        &self,
        message_box_id: &str,
        created: i64,
        delete_type: DeleteType,
    ) -> Result<(DeleteType, Option<Message>)> {
        let message = self
            .store
            .get_message(message_box_id, created)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no message {created} in box {message_box_id}"))
            })?;

        let resolved = match delete_type {
            DeleteType::Soft => DeleteType::Soft,
            DeleteType::Hard => DeleteType::Hard,
            DeleteType::Leaf => {
                // Probe the reversed index: a descendant, if any, is the row
                // immediately after this one.
                let next = self
                    .store
                    .next_thread_key(message_box_id, &message.thread_key)
                    .await?;
                match next {
                    Some(key) if key.is_descendant_of(&message.thread_key) => DeleteType::Soft,
                    _ => DeleteType::Hard,
                }
            }
        };

        let deleted_at = now_millis();
        let result = match resolved {
            DeleteType::Soft => {
                self.store
                    .mark_deleted(message_box_id, created, deleted_at)
                    .await?;
                let mut scrubbed = message.scrubbed();
                scrubbed.deleted = Some(deleted_at);
                (DeleteType::Soft, Some(scrubbed))
            }
            DeleteType::Hard | DeleteType::Leaf => {
                // Tombstone first, then unlist, then flag the row. The order
                // keeps a crashed delete recoverable from the tombstone.
                self.store
                    .insert_tombstone(message_box_id, created, &message)
                    .await?;
                self.store
                    .remove_thread_key(message_box_id, &message.thread_key)
                    .await?;
                self.store
                    .mark_deleted(message_box_id, created, deleted_at)
                    .await?;
                (DeleteType::Hard, None)
            }
        };

        metrics::counter!("messagebox.deleted", "type" => result.0.as_str()).increment(1);
        self.emitter
            .emit_detached(MessageBoxEvent::Deleted {
                message_box_id: message_box_id.to_string(),
                created,
                delete_type: result.0,
            });
        Ok(result)
    }

    /// Most-recent-first page of principals who contributed within the last
    /// 30 days. Entries lapse on their own; removal from the resource does
    /// not purge them.
    ///
    /// # Errors
    ///
    /// Propagates store failures as [`Error::Internal`].
    pub async fn get_recent_contributions(
        &self,
        message_box_id: &str,
        start: usize,
        limit: usize,
    ) -> Result<Vec<collegium_core::principal::PrincipalId>> {
        self.store
            .recent_contributions(message_box_id, start, limit)
            .await
    }

    /// Lock a unique creation timestamp, advancing by 1 ms per contention.
    async fn lock_unique_created(
        &self,
        message_box_id: &str,
        lock_scope: &str,
        mut created: i64,
    ) -> Result<(i64, collegium_core::locking::Lock)> {
        for _ in 0..MAX_CREATED_ATTEMPTS {
            let lock_key = format!("mb:{message_box_id}:{lock_scope}:{created}");
            match self.locks.acquire(&lock_key, CREATED_LOCK_TTL).await? {
                Some(lock) => {
                    // A row may predate the lock (e.g. after a previous lock
                    // lapsed); keep advancing until the slot is truly free.
                    if self
                        .store
                        .get_message(message_box_id, created)
                        .await?
                        .is_some()
                    {
                        if let Err(error) = self.locks.release(lock).await {
                            tracing::debug!(error = %error, "lock release failed");
                        }
                        created += 1;
                        continue;
                    }
                    return Ok((created, lock));
                }
                None => created += 1,
            }
        }
        Err(Error::transient(format!(
            "could not lock a unique timestamp in box {message_box_id}"
        )))
    }

    /// Insert the message row, then its thread-key index row.
    async fn insert_rows(&self, message: &Message) -> Result<()> {
        self.store.insert_message(message).await?;
        self.store
            .index_thread_key(&message.message_box_id, &message.thread_key, message.created)
            .await
    }
}
