use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::{
    config::AppConfig,
    db::create_pool,
    error::{AppError, AppResult},
    services::settings::SettingsStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub settings: SettingsStore,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = create_pool(&config)?;
        let settings = SettingsStore::new(
            db_pool.clone(),
            Duration::from_secs(config.settings_cache_ttl_seconds.max(1)),
        );
        Ok(Self {
            config: Arc::new(config),
            db_pool,
            settings,
        })
    }

    pub fn db_pool(&self) -> AppResult<&PgPool> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
        })
    }
}
