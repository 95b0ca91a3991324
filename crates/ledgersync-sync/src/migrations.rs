//! Database migration management.

use sqlx::PgPool;

use crate::error::SyncResult;

/// Run all pending database migrations.
///
/// Migrations are embedded at compile time from the `migrations/`
/// directory and applied in filename order.
pub async fn run_migrations(pool: &PgPool) -> SyncResult<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;

    tracing::info!("Migrations completed");
    Ok(())
}
