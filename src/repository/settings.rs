use sqlx::PgConnection;

use crate::{error::AppError, models::GlobalSetting, repository::map_db_error};

const SETTING_COLUMNS: &str = "key, value, value_type, category, description, updated_at";

pub async fn list_settings(conn: &mut PgConnection) -> Result<Vec<GlobalSetting>, AppError> {
    sqlx::query_as::<_, GlobalSetting>(&format!(
        "SELECT {SETTING_COLUMNS} FROM global_settings ORDER BY category, key"
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn list_settings_by_category(
    conn: &mut PgConnection,
    category: &str,
) -> Result<Vec<GlobalSetting>, AppError> {
    sqlx::query_as::<_, GlobalSetting>(&format!(
        "SELECT {SETTING_COLUMNS} FROM global_settings WHERE category = $1 ORDER BY key"
    ))
    .bind(category)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn get_setting(
    conn: &mut PgConnection,
    key: &str,
) -> Result<Option<GlobalSetting>, AppError> {
    sqlx::query_as::<_, GlobalSetting>(&format!(
        "SELECT {SETTING_COLUMNS} FROM global_settings WHERE key = $1"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Inserts a setting unless the key already exists. Returns whether a row was written.
pub async fn insert_setting_if_absent(
    conn: &mut PgConnection,
    key: &str,
    value: &str,
    value_type: &str,
    category: &str,
    description: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "INSERT INTO global_settings (key, value, value_type, category, description)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (key) DO NOTHING",
    )
    .bind(key)
    .bind(value)
    .bind(value_type)
    .bind(category)
    .bind(description)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected() > 0)
}

/// Last writer wins; there is no version column.
pub async fn upsert_setting_value(
    conn: &mut PgConnection,
    key: &str,
    value: &str,
    value_type: &str,
    category: &str,
    description: Option<&str>,
) -> Result<GlobalSetting, AppError> {
    sqlx::query_as::<_, GlobalSetting>(&format!(
        "INSERT INTO global_settings (key, value, value_type, category, description)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
         RETURNING {SETTING_COLUMNS}"
    ))
    .bind(key)
    .bind(value)
    .bind(value_type)
    .bind(category)
    .bind(description)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)
}
