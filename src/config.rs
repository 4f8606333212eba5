use std::env;

use chrono::NaiveDate;
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub run_migrations: bool,
    pub business_timezone: Tz,
    pub contract_tx_timeout_seconds: u64,
    pub bill_generation_timeout_ms: u64,
    pub bill_due_days: i64,
    pub settings_cache_ttl_seconds: u64,
    pub max_meters_per_room: usize,
    pub max_meters_per_type: usize,
    pub scheduler_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentdesk API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            run_migrations: env_parse_bool_or("RUN_MIGRATIONS", true),
            business_timezone: parse_timezone(&env_or("BUSINESS_TIMEZONE", "Asia/Shanghai")),
            contract_tx_timeout_seconds: clamp_tx_timeout(env_parse_or(
                "CONTRACT_TX_TIMEOUT_SECONDS",
                5,
            )),
            bill_generation_timeout_ms: env_parse_or("BILL_GENERATION_TIMEOUT_MS", 2000),
            bill_due_days: env_parse_or("BILL_DUE_DAYS", 10),
            settings_cache_ttl_seconds: env_parse_or("SETTINGS_CACHE_TTL_SECONDS", 60),
            max_meters_per_room: env_parse_or("MAX_METERS_PER_ROOM", 10),
            max_meters_per_type: env_parse_or("MAX_METERS_PER_TYPE", 3),
            scheduler_enabled: env_parse_bool_or("SCHEDULER_ENABLED", true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Calendar date in the business timezone. Contract status decisions
    /// compare against this, never against the UTC date.
    pub fn today(&self) -> NaiveDate {
        chrono::Utc::now()
            .with_timezone(&self.business_timezone)
            .date_naive()
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_timezone(raw: &str) -> Tz {
    raw.trim().parse::<Tz>().unwrap_or(chrono_tz::Asia::Shanghai)
}

// Contract writes must fail fast; anything outside 1..=9 seconds is clamped.
fn clamp_tx_timeout(seconds: u64) -> u64 {
    seconds.clamp(1, 9)
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{clamp_tx_timeout, normalize_prefix, parse_csv, parse_timezone};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn clamps_contract_transaction_timeout_to_single_digit_seconds() {
        assert_eq!(clamp_tx_timeout(0), 1);
        assert_eq!(clamp_tx_timeout(5), 5);
        assert_eq!(clamp_tx_timeout(30), 9);
    }

    #[test]
    fn parses_csv_and_timezone() {
        assert_eq!(parse_csv(" a, ,b "), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(parse_timezone("Europe/Berlin"), chrono_tz::Europe::Berlin);
        assert_eq!(parse_timezone("nowhere"), chrono_tz::Asia::Shanghai);
    }
}
