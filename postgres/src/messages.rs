//! Message box storage on PostgreSQL.
//!
//! Four tables:
//!
//! - `messages`: the rows, keyed `(message_box_id, created)`
//! - `message_box_messages`: the thread-key index, clustered ascending and
//!   always read reversed
//! - `message_box_messages_deleted`: tombstones of hard deletes
//! - `message_box_recent_contributions`: contributor index with per-row
//!   expiry

use crate::{codec_error, db_error};
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use collegium_messagebox::model::Message;
use collegium_messagebox::store::MessageStore;
use collegium_messagebox::thread_key::ThreadKey;
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

/// Create the message box tables.
///
/// # Errors
///
/// Database failures surface as [`collegium_core::Error::Internal`].
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    crate::migrations::execute_all(
        pool,
        &[
            r"
            CREATE TABLE IF NOT EXISTS messages (
                message_box_id TEXT NOT NULL,
                created BIGINT NOT NULL,
                id TEXT NOT NULL,
                thread_key TEXT NOT NULL,
                created_by TEXT,
                body TEXT,
                level BIGINT NOT NULL,
                reply_to BIGINT,
                deleted BIGINT,
                PRIMARY KEY (message_box_id, created)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS message_box_messages (
                message_box_id TEXT NOT NULL,
                thread_key TEXT NOT NULL,
                created BIGINT NOT NULL,
                PRIMARY KEY (message_box_id, thread_key)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS message_box_messages_deleted (
                message_box_id TEXT NOT NULL,
                created BIGINT NOT NULL,
                value JSONB NOT NULL,
                PRIMARY KEY (message_box_id, created)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS message_box_recent_contributions (
                message_box_id TEXT NOT NULL,
                contributor_id TEXT NOT NULL,
                contributed_at BIGINT NOT NULL,
                expires_at BIGINT NOT NULL,
                PRIMARY KEY (message_box_id, contributor_id)
            )
            ",
        ],
    )
    .await
}

/// [`MessageStore`] on a PostgreSQL pool.
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<Message> {
        let thread_key: String = row.get("thread_key");
        let created_by: Option<String> = row.get("created_by");
        let level: i64 = row.get("level");
        Ok(Message {
            id: row.get("id"),
            message_box_id: row.get("message_box_id"),
            thread_key: ThreadKey::parse(thread_key)?,
            body: row.get("body"),
            created_by: created_by.and_then(|raw| PrincipalId::parse(raw).ok()),
            created: row.get("created"),
            level: usize::try_from(level).unwrap_or(0),
            reply_to: row.get("reply_to"),
            deleted: row.get("deleted"),
        })
    }
}

impl MessageStore for PostgresMessageStore {
    fn insert_message(&self, message: &Message) -> BoxFuture<'_, Result<()>> {
        let message = message.clone();
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Nesting depth is tiny
            sqlx::query(
                r"
                INSERT INTO messages
                    (message_box_id, created, id, thread_key, created_by, body, level, reply_to, deleted)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (message_box_id, created) DO UPDATE
                    SET body = EXCLUDED.body, deleted = EXCLUDED.deleted
                ",
            )
            .bind(&message.message_box_id)
            .bind(message.created)
            .bind(&message.id)
            .bind(message.thread_key.as_str())
            .bind(message.created_by.as_ref().map(PrincipalId::as_str))
            .bind(&message.body)
            .bind(message.level as i64)
            .bind(message.reply_to)
            .bind(message.deleted)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            let row = sqlx::query(
                r"
                SELECT message_box_id, created, id, thread_key, created_by, body, level, reply_to, deleted
                FROM messages
                WHERE message_box_id = $1 AND created = $2
                ",
            )
            .bind(&message_box_id)
            .bind(created)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(Self::row_to_message).transpose()
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
            sqlx::query(
                r"UPDATE messages SET body = $3 WHERE message_box_id = $1 AND created = $2",
            )
            .bind(&message_box_id)
            .bind(created)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            sqlx::query(
                r"UPDATE messages SET deleted = $3 WHERE message_box_id = $1 AND created = $2",
            )
            .bind(&message_box_id)
            .bind(created)
            .bind(deleted_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            sqlx::query(
                r"
                INSERT INTO message_box_messages (message_box_id, thread_key, created)
                VALUES ($1, $2, $3)
                ON CONFLICT (message_box_id, thread_key) DO UPDATE SET created = EXCLUDED.created
                ",
            )
            .bind(&message_box_id)
            .bind(thread_key.as_str())
            .bind(created)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            sqlx::query(
                r"DELETE FROM message_box_messages WHERE message_box_id = $1 AND thread_key = $2",
            )
            .bind(&message_box_id)
            .bind(thread_key.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
        let start = start.map(|key| key.as_str().to_string());
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Page sizes are small
            let rows = sqlx::query(
                r"
                SELECT thread_key FROM message_box_messages
                WHERE message_box_id = $1 AND ($2::TEXT IS NULL OR thread_key < $2)
                ORDER BY thread_key DESC
                LIMIT $3
                ",
            )
            .bind(&message_box_id)
            .bind(&start)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter()
                .map(|row| ThreadKey::parse(row.get::<String, _>("thread_key")))
                .collect()
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
            let row = sqlx::query(
                r"
                SELECT thread_key FROM message_box_messages
                WHERE message_box_id = $1 AND thread_key < $2
                ORDER BY thread_key DESC
                LIMIT 1
                ",
            )
            .bind(&message_box_id)
            .bind(thread_key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.map(|row| ThreadKey::parse(row.get::<String, _>("thread_key")))
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
            let value = serde_json::to_value(&message).map_err(codec_error)?;
            sqlx::query(
                r"
                INSERT INTO message_box_messages_deleted (message_box_id, created, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (message_box_id, created) DO UPDATE SET value = EXCLUDED.value
                ",
            )
            .bind(&message_box_id)
            .bind(created)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            sqlx::query(
                r"
                INSERT INTO message_box_recent_contributions
                    (message_box_id, contributor_id, contributed_at, expires_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (message_box_id, contributor_id) DO UPDATE
                    SET contributed_at = EXCLUDED.contributed_at,
                        expires_at = EXCLUDED.expires_at
                ",
            )
            .bind(&message_box_id)
            .bind(contributor.as_str())
            .bind(contributed_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            #[allow(clippy::cast_possible_wrap)] // Page sizes are small
            let rows = sqlx::query(
                r"
                SELECT contributor_id FROM message_box_recent_contributions
                WHERE message_box_id = $1 AND expires_at > $2
                ORDER BY contributed_at DESC
                OFFSET $3 LIMIT $4
                ",
            )
            .bind(&message_box_id)
            .bind(collegium_core::now_millis())
            .bind(start as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter()
                .map(|row| PrincipalId::parse(row.get::<String, _>("contributor_id")))
                .collect()
        })
    }
}
