//! Activity storage on PostgreSQL.
//!
//! Pending routes, aggregates and the stream-status counters are stored as
//! JSONB blobs behind their natural keys; stream entries additionally carry
//! `published` and `expires_at` columns so newest-first TTL-filtered reads
//! stay in SQL.

use crate::{codec_error, db_error};
use collegium_activity::model::{Format, RoutedActivity, StreamEntry, StreamType};
use collegium_activity::store::{ActivityStore, AggregateStatus};
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

/// Create the activity tables.
///
/// # Errors
///
/// Database failures surface as [`collegium_core::Error::Internal`].
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    crate::migrations::execute_all(
        pool,
        &[
            r"
            CREATE TABLE IF NOT EXISTS activity_pending (
                bucket BIGINT NOT NULL,
                seq BIGSERIAL,
                entry JSONB NOT NULL,
                PRIMARY KEY (bucket, seq)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS activity_aggregates (
                recipient_id TEXT NOT NULL,
                stream_type TEXT NOT NULL,
                group_key TEXT NOT NULL,
                status JSONB NOT NULL,
                PRIMARY KEY (recipient_id, stream_type, group_key)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS activity_streams (
                recipient_id TEXT NOT NULL,
                stream_type TEXT NOT NULL,
                format TEXT NOT NULL,
                activity_id TEXT NOT NULL,
                entry JSONB NOT NULL,
                published BIGINT NOT NULL,
                expires_at BIGINT NOT NULL,
                PRIMARY KEY (recipient_id, stream_type, format, activity_id)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS activity_stream_status (
                recipient_id TEXT NOT NULL,
                stream_type TEXT NOT NULL,
                num_new BIGINT NOT NULL,
                PRIMARY KEY (recipient_id, stream_type)
            )
            ",
        ],
    )
    .await
}

/// [`ActivityStore`] on a PostgreSQL pool.
pub struct PostgresActivityStore {
    pool: PgPool,
}

impl PostgresActivityStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ActivityStore for PostgresActivityStore {
    fn append_pending(&self, bucket: u32, route: &RoutedActivity) -> BoxFuture<'_, Result<()>> {
        let route = route.clone();
        Box::pin(async move {
            let entry = serde_json::to_value(&route).map_err(codec_error)?;
            sqlx::query(r"INSERT INTO activity_pending (bucket, entry) VALUES ($1, $2)")
                .bind(i64::from(bucket))
                .bind(&entry)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn read_pending(
        &self,
        bucket: u32,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<(u64, RoutedActivity)>>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Batch sizes are small
            let rows = sqlx::query(
                r"
                SELECT seq, entry FROM activity_pending
                WHERE bucket = $1
                ORDER BY seq ASC
                LIMIT $2
                ",
            )
            .bind(i64::from(bucket))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter()
                .map(|row| {
                    let seq: i64 = row.get("seq");
                    let entry: serde_json::Value = row.get("entry");
                    let route: RoutedActivity =
                        serde_json::from_value(entry).map_err(codec_error)?;
                    Ok((u64::try_from(seq).unwrap_or(0), route))
                })
                .collect()
        })
    }

    fn delete_pending(&self, bucket: u32, seqs: &[u64]) -> BoxFuture<'_, Result<()>> {
        let seqs: Vec<i64> = seqs
            .iter()
            .map(|seq| i64::try_from(*seq).unwrap_or(i64::MAX))
            .collect();
        Box::pin(async move {
            sqlx::query(r"DELETE FROM activity_pending WHERE bucket = $1 AND seq = ANY($2)")
                .bind(i64::from(bucket))
                .bind(&seqs)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn get_aggregate(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        group_key: &str,
    ) -> BoxFuture<'_, Result<Option<AggregateStatus>>> {
        let recipient = recipient.clone();
        let group_key = group_key.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT status FROM activity_aggregates
                WHERE recipient_id = $1 AND stream_type = $2 AND group_key = $3
                ",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .bind(&group_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.map(|row| {
                let status: serde_json::Value = row.get("status");
                serde_json::from_value(status).map_err(codec_error)
            })
            .transpose()
        })
    }

    fn put_aggregate(&self, status: &AggregateStatus) -> BoxFuture<'_, Result<()>> {
        let status = status.clone();
        Box::pin(async move {
            let value = serde_json::to_value(&status).map_err(codec_error)?;
            sqlx::query(
                r"
                INSERT INTO activity_aggregates (recipient_id, stream_type, group_key, status)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (recipient_id, stream_type, group_key)
                    DO UPDATE SET status = EXCLUDED.status
                ",
            )
            .bind(status.recipient_id.as_str())
            .bind(status.stream_type.as_str())
            .bind(&status.group_key)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            sqlx::query(
                r"DELETE FROM activity_aggregates WHERE recipient_id = $1 AND stream_type = $2",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
        let recipient = recipient.clone();
        let entry = entry.clone();
        Box::pin(async move {
            let value = serde_json::to_value(&entry).map_err(codec_error)?;
            sqlx::query(
                r"
                INSERT INTO activity_streams
                    (recipient_id, stream_type, format, activity_id, entry, published, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (recipient_id, stream_type, format, activity_id)
                    DO UPDATE SET entry = EXCLUDED.entry,
                                  published = EXCLUDED.published,
                                  expires_at = EXCLUDED.expires_at
                ",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .bind(format.as_str())
            .bind(&entry.activity_id)
            .bind(&value)
            .bind(entry.published)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
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
            #[allow(clippy::cast_possible_wrap)] // Page sizes are small
            let rows = sqlx::query(
                r"
                SELECT entry FROM activity_streams
                WHERE recipient_id = $1 AND stream_type = $2 AND format = $3
                  AND expires_at > $4
                ORDER BY published DESC
                LIMIT $5
                ",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .bind(format.as_str())
            .bind(collegium_core::now_millis())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter()
                .map(|row| {
                    let entry: serde_json::Value = row.get("entry");
                    serde_json::from_value(entry).map_err(codec_error)
                })
                .collect()
        })
    }

    fn get_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
    ) -> BoxFuture<'_, Result<i64>> {
        let recipient = recipient.clone();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT num_new FROM activity_stream_status
                WHERE recipient_id = $1 AND stream_type = $2
                ",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(row.map_or(0, |row| row.get("num_new")))
        })
    }

    fn set_stream_status(
        &self,
        recipient: &PrincipalId,
        stream_type: StreamType,
        num_new: i64,
    ) -> BoxFuture<'_, Result<()>> {
        let recipient = recipient.clone();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO activity_stream_status (recipient_id, stream_type, num_new)
                VALUES ($1, $2, $3)
                ON CONFLICT (recipient_id, stream_type)
                    DO UPDATE SET num_new = EXCLUDED.num_new
                ",
            )
            .bind(recipient.as_str())
            .bind(stream_type.as_str())
            .bind(num_new)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_activity_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PostgresActivityStore>();
        assert_sync::<PostgresActivityStore>();
    }
}
