use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use moka::future::Cache;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    models::{GlobalSetting, PaymentCycle},
    repository::settings as settings_repo,
};

pub const KEY_ELECTRICITY_PRICE: &str = "electricity_price";
pub const KEY_WATER_PRICE: &str = "water_price";
pub const KEY_GAS_PRICE: &str = "gas_price";
pub const KEY_DEFAULT_RENT_CYCLE: &str = "default_rent_cycle";
pub const KEY_REMINDER_DAYS: &str = "reminder_days";

pub const DEFAULT_ELECTRICITY_PRICE: f64 = 0.6;
pub const DEFAULT_WATER_PRICE: f64 = 3.5;
pub const DEFAULT_GAS_PRICE: f64 = 2.5;
pub const DEFAULT_REMINDER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
pub struct SettingDefault {
    pub key: &'static str,
    pub value: &'static str,
    pub value_type: &'static str,
    pub category: &'static str,
    pub description: &'static str,
}

/// Seed table for `global_settings`, and the fallback whenever the store
/// cannot be read. Live and cached price paths both resolve through it.
pub const DEFAULT_SETTINGS: &[SettingDefault] = &[
    SettingDefault {
        key: KEY_ELECTRICITY_PRICE,
        value: "0.6",
        value_type: "number",
        category: "billing",
        description: "电费单价（元/度）",
    },
    SettingDefault {
        key: KEY_WATER_PRICE,
        value: "3.5",
        value_type: "number",
        category: "billing",
        description: "水费单价（元/吨）",
    },
    SettingDefault {
        key: KEY_GAS_PRICE,
        value: "2.5",
        value_type: "number",
        category: "billing",
        description: "燃气单价（元/立方米）",
    },
    SettingDefault {
        key: KEY_DEFAULT_RENT_CYCLE,
        value: "monthly",
        value_type: "string",
        category: "billing",
        description: "默认收租周期",
    },
    SettingDefault {
        key: KEY_REMINDER_DAYS,
        value: "7",
        value_type: "number",
        category: "reminder",
        description: "账单到期提前提醒天数",
    },
    SettingDefault {
        key: "overdue_reminder_enabled",
        value: "true",
        value_type: "boolean",
        category: "reminder",
        description: "是否提醒逾期账单",
    },
    SettingDefault {
        key: "company_name",
        value: "",
        value_type: "string",
        category: "system",
        description: "运营方名称",
    },
];

pub fn find_default(key: &str) -> Option<&'static SettingDefault> {
    DEFAULT_SETTINGS.iter().find(|entry| entry.key == key)
}

/// Defaults whose key is not stored yet. Stored keys are never re-seeded,
/// so customized values survive repeated initialization.
pub fn missing_defaults<'a>(
    existing_keys: impl IntoIterator<Item = &'a str>,
) -> Vec<&'static SettingDefault> {
    let existing = existing_keys.into_iter().collect::<HashSet<_>>();
    DEFAULT_SETTINGS
        .iter()
        .filter(|entry| !existing.contains(entry.key))
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillingSettings {
    pub electricity_price: f64,
    pub water_price: f64,
    pub gas_price: f64,
    pub default_rent_cycle: PaymentCycle,
    pub reminder_days: i64,
}

impl BillingSettings {
    fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Self {
        Self {
            electricity_price: positive_price(lookup(KEY_ELECTRICITY_PRICE))
                .unwrap_or(DEFAULT_ELECTRICITY_PRICE),
            water_price: positive_price(lookup(KEY_WATER_PRICE)).unwrap_or(DEFAULT_WATER_PRICE),
            gas_price: positive_price(lookup(KEY_GAS_PRICE)).unwrap_or(DEFAULT_GAS_PRICE),
            default_rent_cycle: PaymentCycle::parse_lenient(lookup(KEY_DEFAULT_RENT_CYCLE)),
            reminder_days: lookup(KEY_REMINDER_DAYS)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .filter(|days| *days >= 0)
                .unwrap_or(DEFAULT_REMINDER_DAYS),
        }
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn positive_price(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|price| price.is_finite() && *price > 0.0)
}

/// Point-in-time copy of the settings table, usable without the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSnapshot {
    values: HashMap<String, String>,
}

impl SettingsSnapshot {
    pub fn from_settings(settings: &[GlobalSetting]) -> Self {
        Self {
            values: settings
                .iter()
                .map(|setting| (setting.key.clone(), setting.value.clone()))
                .collect(),
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn billing_settings(&self) -> BillingSettings {
        BillingSettings::from_lookup(|key| self.get(key))
    }
}

/// Source of billing settings for price resolution.
pub trait SettingsProvider {
    fn billing_settings(&self) -> impl Future<Output = BillingSettings> + Send;
}

impl SettingsProvider for SettingsSnapshot {
    async fn billing_settings(&self) -> BillingSettings {
        SettingsSnapshot::billing_settings(self)
    }
}

const SNAPSHOT_CACHE_KEY: &str = "global";

/// Postgres-backed settings with a short-lived read cache.
#[derive(Clone)]
pub struct SettingsStore {
    pool: Option<PgPool>,
    cache: Cache<&'static str, SettingsSnapshot>,
    initialized: Arc<OnceCell<()>>,
}

impl SettingsStore {
    pub fn new(pool: Option<PgPool>, cache_ttl: Duration) -> Self {
        Self {
            pool,
            cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(cache_ttl)
                .build(),
            initialized: Arc::new(OnceCell::new()),
        }
    }

    fn pool(&self) -> AppResult<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            AppError::Dependency(
                "Settings store is not configured. Set DATABASE_URL.".to_string(),
            )
        })
    }

    /// Seeds every default key that does not exist yet. Existing values,
    /// including customized ones, are left alone.
    pub async fn initialize_default_settings(&self) -> AppResult<u64> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await.map_err(crate::repository::map_db_error)?;
        let stored = settings_repo::list_settings(&mut conn).await?;
        let missing = missing_defaults(stored.iter().map(|setting| setting.key.as_str()));
        let mut inserted = 0;
        for entry in missing {
            if settings_repo::insert_setting_if_absent(
                &mut conn,
                entry.key,
                entry.value,
                entry.value_type,
                entry.category,
                entry.description,
            )
            .await?
            {
                inserted += 1;
            }
        }
        if inserted > 0 {
            info!(inserted, "Seeded default global settings");
        }
        Ok(inserted)
    }

    async fn ensure_initialized(&self) -> AppResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.initialize_default_settings().await.map(|_| ())
            })
            .await
            .map(|_| ())
    }

    pub async fn get_setting(&self, key: &str) -> AppResult<GlobalSetting> {
        self.ensure_initialized().await?;
        let mut conn = self.acquire().await?;
        settings_repo::get_setting(&mut conn, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("设置项不存在：{key}")))
    }

    pub async fn get_all_settings(&self) -> AppResult<Vec<GlobalSetting>> {
        self.ensure_initialized().await?;
        let mut conn = self.acquire().await?;
        settings_repo::list_settings(&mut conn).await
    }

    pub async fn get_settings_by_category(&self, category: &str) -> AppResult<Vec<GlobalSetting>> {
        self.ensure_initialized().await?;
        let mut conn = self.acquire().await?;
        settings_repo::list_settings_by_category(&mut conn, category.trim()).await
    }

    pub async fn update_setting(&self, key: &str, value: &Value) -> AppResult<GlobalSetting> {
        self.ensure_initialized().await?;
        let mut conn = self.acquire().await?;
        let updated = write_setting(&mut conn, key, value).await?;
        self.cache.invalidate(SNAPSHOT_CACHE_KEY).await;
        Ok(updated)
    }

    /// Applies all updates in one transaction; any invalid entry rejects the batch.
    pub async fn update_settings(&self, updates: &Map<String, Value>) -> AppResult<Vec<GlobalSetting>> {
        self.ensure_initialized().await?;
        let mut tx = self
            .pool()?
            .begin()
            .await
            .map_err(crate::repository::map_db_error)?;
        let mut written = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            written.push(write_setting(&mut tx, key, value).await?);
        }
        tx.commit().await.map_err(crate::repository::map_db_error)?;
        self.cache.invalidate(SNAPSHOT_CACHE_KEY).await;
        Ok(written)
    }

    pub async fn reset_to_defaults(&self) -> AppResult<Vec<GlobalSetting>> {
        let mut tx = self
            .pool()?
            .begin()
            .await
            .map_err(crate::repository::map_db_error)?;
        let mut written = Vec::with_capacity(DEFAULT_SETTINGS.len());
        for entry in DEFAULT_SETTINGS {
            written.push(
                settings_repo::upsert_setting_value(
                    &mut tx,
                    entry.key,
                    entry.value,
                    entry.value_type,
                    entry.category,
                    Some(entry.description),
                )
                .await?,
            );
        }
        tx.commit().await.map_err(crate::repository::map_db_error)?;
        self.cache.invalidate(SNAPSHOT_CACHE_KEY).await;
        info!("Global settings reset to defaults");
        Ok(written)
    }

    /// Cached snapshot of the whole table. Falls back to the built-in
    /// defaults when the store is unreachable; fallbacks are not cached.
    pub async fn snapshot(&self) -> SettingsSnapshot {
        if self.pool.is_none() {
            return SettingsSnapshot::default();
        }
        let loaded = self
            .cache
            .try_get_with(SNAPSHOT_CACHE_KEY, async {
                self.ensure_initialized().await?;
                let mut conn = self.acquire().await?;
                let rows = settings_repo::list_settings(&mut conn).await?;
                Ok::<_, AppError>(SettingsSnapshot::from_settings(&rows))
            })
            .await;

        match loaded {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(error = %error, "Settings store unavailable, using default prices");
                SettingsSnapshot::default()
            }
        }
    }

    pub async fn get_billing_settings(&self) -> BillingSettings {
        self.snapshot().await.billing_settings()
    }

    async fn acquire(&self) -> AppResult<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool()?
            .acquire()
            .await
            .map_err(crate::repository::map_db_error)
    }
}

impl SettingsProvider for SettingsStore {
    async fn billing_settings(&self) -> BillingSettings {
        self.get_billing_settings().await
    }
}

async fn write_setting(
    conn: &mut sqlx::PgConnection,
    key: &str,
    value: &Value,
) -> AppResult<GlobalSetting> {
    let key = key.trim();
    let existing = settings_repo::get_setting(conn, key).await?;
    let (value_type, category, description) = match (&existing, find_default(key)) {
        (Some(row), _) => (
            row.value_type.clone(),
            row.category.clone(),
            row.description.clone(),
        ),
        (None, Some(entry)) => (
            entry.value_type.to_string(),
            entry.category.to_string(),
            Some(entry.description.to_string()),
        ),
        (None, None) => {
            return Err(AppError::NotFound(format!("设置项不存在：{key}")));
        }
    };

    let serialized = serialize_setting_value(key, &value_type, value)?;
    settings_repo::upsert_setting_value(
        conn,
        key,
        &serialized,
        &value_type,
        &category,
        description.as_deref(),
    )
    .await
}

/// Converts a JSON value into the stored text form, checking it against the
/// key's type tag. Price keys must be within the meter price range.
pub fn serialize_setting_value(key: &str, value_type: &str, value: &Value) -> AppResult<String> {
    let invalid = || AppError::UnprocessableEntity(format!("设置项 {key} 的值类型应为 {value_type}"));
    match value_type {
        "number" => {
            let number = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|number| number.is_finite())
            .ok_or_else(invalid)?;
            if [KEY_ELECTRICITY_PRICE, KEY_WATER_PRICE, KEY_GAS_PRICE].contains(&key)
                && !(0.01..=100.0).contains(&number)
            {
                return Err(AppError::UnprocessableEntity(format!(
                    "单价必须在 0.01 到 100 之间：{key}"
                )));
            }
            Ok(number.to_string())
        }
        "boolean" => match value {
            Value::Bool(flag) => Ok(flag.to_string()),
            Value::String(text) if text == "true" || text == "false" => Ok(text.clone()),
            _ => Err(invalid()),
        },
        _ => match value {
            Value::String(text) => Ok(text.trim().to_string()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            _ => Err(invalid()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use std::collections::BTreeMap;

    use super::{
        missing_defaults, serialize_setting_value, BillingSettings, SettingsProvider,
        SettingsSnapshot, DEFAULT_SETTINGS, KEY_ELECTRICITY_PRICE,
    };
    use crate::models::PaymentCycle;

    #[test]
    fn defaults_match_hardcoded_fallbacks() {
        let settings = BillingSettings::default();
        assert_eq!(settings.electricity_price, 0.6);
        assert_eq!(settings.water_price, 3.5);
        assert_eq!(settings.gas_price, 2.5);
        assert_eq!(settings.default_rent_cycle, PaymentCycle::Monthly);
        assert_eq!(settings.reminder_days, 7);
    }

    #[test]
    fn seed_table_and_fallbacks_agree() {
        let seeded = SettingsSnapshot::from_pairs(
            DEFAULT_SETTINGS
                .iter()
                .map(|entry| (entry.key, entry.value)),
        );
        assert_eq!(seeded.billing_settings(), BillingSettings::default());
    }

    #[test]
    fn default_keys_are_unique() {
        let mut keys = DEFAULT_SETTINGS.iter().map(|entry| entry.key).collect::<Vec<_>>();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), DEFAULT_SETTINGS.len());
    }

    #[test]
    fn snapshot_ignores_unusable_prices() {
        let snapshot = SettingsSnapshot::from_pairs([
            ("electricity_price", "0.8"),
            ("water_price", "abc"),
            ("gas_price", "-1"),
            ("default_rent_cycle", "quarterly"),
        ]);
        let settings = snapshot.billing_settings();
        assert_eq!(settings.electricity_price, 0.8);
        assert_eq!(settings.water_price, 3.5);
        assert_eq!(settings.gas_price, 2.5);
        assert_eq!(settings.default_rent_cycle, PaymentCycle::Quarterly);
    }

    #[tokio::test]
    async fn snapshot_acts_as_provider() {
        let snapshot = SettingsSnapshot::from_pairs([("water_price", "4")]);
        let settings = SettingsProvider::billing_settings(&snapshot).await;
        assert_eq!(settings.water_price, 4.0);
    }

    #[test]
    fn serializes_values_by_type() {
        assert_eq!(
            serialize_setting_value(KEY_ELECTRICITY_PRICE, "number", &json!(0.75)).expect("ok"),
            "0.75"
        );
        assert!(serialize_setting_value(KEY_ELECTRICITY_PRICE, "number", &json!(250)).is_err());
        assert!(serialize_setting_value("reminder_days", "number", &json!("x")).is_err());
        assert_eq!(
            serialize_setting_value("overdue_reminder_enabled", "boolean", &json!(false))
                .expect("ok"),
            "false"
        );
        assert_eq!(
            serialize_setting_value("company_name", "string", &json!(" 安居 ")).expect("ok"),
            "安居"
        );
    }

    fn seed(table: &mut BTreeMap<String, String>) -> usize {
        let missing = missing_defaults(table.keys().map(String::as_str));
        let inserted = missing.len();
        for entry in missing {
            table.insert(entry.key.to_string(), entry.value.to_string());
        }
        inserted
    }

    #[test]
    fn seeding_twice_matches_seeding_once() {
        let mut table = BTreeMap::from([(KEY_ELECTRICITY_PRICE.to_string(), "0.85".to_string())]);

        assert_eq!(seed(&mut table), DEFAULT_SETTINGS.len() - 1);
        let once = table.clone();
        assert_eq!(seed(&mut table), 0);

        assert_eq!(table, once);
        assert_eq!(table.len(), DEFAULT_SETTINGS.len());
        assert_eq!(table[KEY_ELECTRICITY_PRICE], "0.85");
    }
}
