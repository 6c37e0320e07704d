//! Invitation storage on PostgreSQL.

use crate::{codec_error, db_error};
use collegium_core::Result;
use collegium_invitations::model::Invitation;
use collegium_invitations::store::InvitationStore;
use futures::future::BoxFuture;
use sqlx::{PgPool, Row};

/// Create the invitation tables.
///
/// # Errors
///
/// Database failures surface as [`collegium_core::Error::Internal`].
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    crate::migrations::execute_all(
        pool,
        &[
            r"
            CREATE TABLE IF NOT EXISTS invitations (
                email TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                value JSONB NOT NULL,
                PRIMARY KEY (email, resource_id)
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS invitation_tokens (
                token TEXT PRIMARY KEY,
                email TEXT NOT NULL
            )
            ",
        ],
    )
    .await
}

/// [`InvitationStore`] on a PostgreSQL pool.
pub struct PostgresInvitationStore {
    pool: PgPool,
}

impl PostgresInvitationStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_invitation(row: &sqlx::postgres::PgRow) -> Result<Invitation> {
        let value: serde_json::Value = row.get("value");
        serde_json::from_value(value).map_err(codec_error)
    }
}

impl InvitationStore for PostgresInvitationStore {
    fn upsert(&self, invitation: &Invitation) -> BoxFuture<'_, Result<()>> {
        let invitation = invitation.clone();
        Box::pin(async move {
            let value = serde_json::to_value(&invitation).map_err(codec_error)?;
            sqlx::query(
                r"
                INSERT INTO invitations (email, resource_id, value)
                VALUES ($1, $2, $3)
                ON CONFLICT (email, resource_id) DO UPDATE SET value = EXCLUDED.value
                ",
            )
            .bind(&invitation.email)
            .bind(&invitation.resource.resource_id)
            .bind(&value)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn get(&self, email: &str, resource_id: &str) -> BoxFuture<'_, Result<Option<Invitation>>> {
        let email = email.to_string();
        let resource_id = resource_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"SELECT value FROM invitations WHERE email = $1 AND resource_id = $2",
            )
            .bind(&email)
            .bind(&resource_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(Self::row_to_invitation).transpose()
        })
    }

    fn by_email(&self, email: &str) -> BoxFuture<'_, Result<Vec<Invitation>>> {
        let email = email.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                r"SELECT value FROM invitations WHERE email = $1 ORDER BY resource_id ASC",
            )
            .bind(&email)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            rows.iter().map(Self::row_to_invitation).collect()
        })
    }

    fn put_token(&self, token: &str, email: &str) -> BoxFuture<'_, Result<()>> {
        let token = token.to_string();
        let email = email.to_string();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO invitation_tokens (token, email)
                VALUES ($1, $2)
                ON CONFLICT (token) DO UPDATE SET email = EXCLUDED.email
                ",
            )
            .bind(&token)
            .bind(&email)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn email_for_token(&self, token: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let token = token.to_string();
        Box::pin(async move {
            let row = sqlx::query(r"SELECT email FROM invitation_tokens WHERE token = $1")
                .bind(&token)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(row.map(|row| row.get("email")))
        })
    }

    fn token_for_email(&self, email: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let email = email.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"SELECT token FROM invitation_tokens WHERE email = $1 LIMIT 1",
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(row.map(|row| row.get("token")))
        })
    }

    fn delete_accepted(
        &self,
        email: &str,
        resource_ids: &[String],
        token: &str,
    ) -> BoxFuture<'_, Result<()>> {
        let email = email.to_string();
        let resource_ids = resource_ids.to_vec();
        let token = token.to_string();
        Box::pin(async move {
            // One transaction: the batch and its token disappear together.
            let mut tx = self.pool.begin().await.map_err(db_error)?;
            sqlx::query(
                r"DELETE FROM invitations WHERE email = $1 AND resource_id = ANY($2)",
            )
            .bind(&email)
            .bind(&resource_ids)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            sqlx::query(r"DELETE FROM invitation_tokens WHERE token = $1")
                .bind(&token)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            tx.commit().await.map_err(db_error)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_invitation_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PostgresInvitationStore>();
        assert_sync::<PostgresInvitationStore>();
    }
}
