use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{config::AppConfig, error::AppError};

/// Builds the pool without connecting; the first query opens a connection,
/// so the API starts even when the database is briefly unreachable.
pub fn create_pool(config: &AppConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL is not set; database-backed routes will return 503");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections.max(1))
        .min_connections(
            config
                .db_pool_min_connections
                .min(config.db_pool_max_connections.max(1)),
        )
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds.max(1)))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(database_url)?;

    Ok(Some(pool))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| AppError::Dependency(format!("Migration failed: {error}")))?;
    tracing::info!("Database migrations complete");
    Ok(())
}
