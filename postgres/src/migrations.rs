//! Ordered schema creation.
//!
//! Each storage module contributes an `ensure_schema` function;
//! [`run_migrations`] runs them in one fixed order. The order is treated as
//! load-bearing even where no dependency is documented.

use crate::db_error;
use collegium_core::Result;
use sqlx::PgPool;

/// Create every schema this crate owns, in order.
///
/// Idempotent: every statement is `CREATE TABLE IF NOT EXISTS`.
///
/// # Errors
///
/// Database failures surface as [`collegium_core::Error::Internal`].
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    crate::messages::ensure_schema(pool).await?;
    crate::activity::ensure_schema(pool).await?;
    crate::invitations::ensure_schema(pool).await?;
    tracing::info!("collegium schemas ensured");
    Ok(())
}

pub(crate) async fn execute_all(pool: &PgPool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await.map_err(db_error)?;
    }
    Ok(())
}
