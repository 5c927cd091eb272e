//! Persistence pool setup and schema migrations.
//!
//! Connection pool sized to roughly `drainer concurrency + dashboard
//! concurrency` per the concurrency model; a single pool is shared by the
//! batch writer (writer) and the dashboard query service (reader).

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::AppError;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Applies the embedded migration set. Idempotent: already-applied
/// migrations are skipped by sqlx's version-tracking table.
pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Persistence(sqlx::Error::Migrate(Box::new(e))))?;
    Ok(())
}
