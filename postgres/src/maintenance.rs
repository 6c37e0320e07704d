//! Background reclamation of TTL'd rows.
//!
//! Reads already filter lapsed rows; this pass only returns the space.

use crate::db_error;
use collegium_core::Result;
use sqlx::PgPool;

/// Delete every lapsed stream entry and recent-contribution row.
///
/// Returns the number of rows reclaimed.
///
/// # Errors
///
/// Database failures surface as [`collegium_core::Error::Internal`].
pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let now = collegium_core::now_millis();

    let streams = sqlx::query(r"DELETE FROM activity_streams WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await
        .map_err(db_error)?
        .rows_affected();
    let contributions =
        sqlx::query(r"DELETE FROM message_box_recent_contributions WHERE expires_at <= $1")
            .bind(now)
            .execute(pool)
            .await
            .map_err(db_error)?
            .rows_affected();

    let reclaimed = streams + contributions;
    if reclaimed > 0 {
        tracing::debug!(streams, contributions, "expired rows reclaimed");
        metrics::counter!("storage.purged").increment(reclaimed);
    }
    Ok(reclaimed)
}
