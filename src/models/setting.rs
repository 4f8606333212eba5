use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the key/value settings table. `value` is stored serialized;
/// `value_type` says how to read it back (`number`, `string`, `boolean`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct GlobalSetting {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub category: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}
