use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    models::{Meter, MeterType, PaymentCycle, PriceSource},
    services::settings::{
        BillingSettings, SettingsProvider, SettingsSnapshot, DEFAULT_ELECTRICITY_PRICE,
        DEFAULT_GAS_PRICE, DEFAULT_WATER_PRICE,
    },
};

pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // Avoid handing out -0.0 for values that round to zero.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Per-meter price overrides; any `None` falls through to the global setting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MeterPriceOverrides {
    pub electricity: Option<f64>,
    pub water: Option<f64>,
    pub gas: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ResolvedPrice {
    pub unit_price: f64,
    pub source: PriceSource,
}

/// Precedence: meter override, then global setting, then the hardcoded default.
pub fn resolve_unit_price(
    meter_override: Option<f64>,
    global_setting: f64,
    hardcoded_default: f64,
) -> ResolvedPrice {
    if let Some(price) = meter_override.filter(|price| price.is_finite() && *price > 0.0) {
        return ResolvedPrice {
            unit_price: price,
            source: PriceSource::MeterConfig,
        };
    }
    let unit_price = if global_setting.is_finite() && global_setting > 0.0 {
        global_setting
    } else {
        hardcoded_default
    };
    ResolvedPrice {
        unit_price,
        source: PriceSource::GlobalSetting,
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct EffectivePrices {
    pub electricity: ResolvedPrice,
    pub water: ResolvedPrice,
    pub gas: ResolvedPrice,
}

pub fn resolve_prices(overrides: &MeterPriceOverrides, settings: &BillingSettings) -> EffectivePrices {
    EffectivePrices {
        electricity: resolve_unit_price(
            overrides.electricity,
            settings.electricity_price,
            DEFAULT_ELECTRICITY_PRICE,
        ),
        water: resolve_unit_price(overrides.water, settings.water_price, DEFAULT_WATER_PRICE),
        gas: resolve_unit_price(overrides.gas, settings.gas_price, DEFAULT_GAS_PRICE),
    }
}

/// Price for one meter: its own `unit_price`, else the setting for its type.
pub fn resolve_meter_price(meter: &Meter, settings: &BillingSettings) -> ResolvedPrice {
    match meter.meter_type {
        MeterType::Electricity => resolve_unit_price(
            meter.unit_price,
            settings.electricity_price,
            DEFAULT_ELECTRICITY_PRICE,
        ),
        MeterType::ColdWater | MeterType::HotWater => {
            resolve_unit_price(meter.unit_price, settings.water_price, DEFAULT_WATER_PRICE)
        }
        MeterType::Gas => resolve_unit_price(meter.unit_price, settings.gas_price, DEFAULT_GAS_PRICE),
    }
}

/// Gas fields are absent (not zero) when no gas was used.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UtilityBillResult {
    pub electricity_usage: f64,
    pub electricity_price: f64,
    pub electricity_cost: f64,
    pub water_usage: f64,
    pub water_price: f64,
    pub water_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_usage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_cost: Option<f64>,
    pub total_cost: f64,
}

fn compute_utility_bill(
    electricity_usage: f64,
    water_usage: f64,
    gas_usage: f64,
    prices: &EffectivePrices,
) -> UtilityBillResult {
    let electricity_cost = round2(electricity_usage * prices.electricity.unit_price);
    let water_cost = round2(water_usage * prices.water.unit_price);
    let gas_cost = if gas_usage > 0.0 {
        Some(round2(gas_usage * prices.gas.unit_price))
    } else {
        None
    };

    UtilityBillResult {
        electricity_usage,
        electricity_price: prices.electricity.unit_price,
        electricity_cost,
        water_usage,
        water_price: prices.water.unit_price,
        water_cost,
        gas_usage: gas_cost.map(|_| gas_usage),
        gas_price: gas_cost.map(|_| prices.gas.unit_price),
        gas_cost,
        total_cost: round2(electricity_cost + water_cost + gas_cost.unwrap_or(0.0)),
    }
}

/// Utility cost against live settings.
pub async fn calculate_utility_bill<P: SettingsProvider>(
    provider: &P,
    electricity_usage: f64,
    water_usage: f64,
    gas_usage: f64,
    overrides: Option<&MeterPriceOverrides>,
) -> UtilityBillResult {
    let settings = provider.billing_settings().await;
    let prices = resolve_prices(&overrides.copied().unwrap_or_default(), &settings);
    compute_utility_bill(electricity_usage, water_usage, gas_usage, &prices)
}

/// Same computation against a cached snapshot, for callers without store access.
pub fn calculate_utility_bill_cached(
    snapshot: &SettingsSnapshot,
    electricity_usage: f64,
    water_usage: f64,
    gas_usage: f64,
    overrides: Option<&MeterPriceOverrides>,
) -> UtilityBillResult {
    let settings = snapshot.billing_settings();
    let prices = resolve_prices(&overrides.copied().unwrap_or_default(), &settings);
    compute_utility_bill(electricity_usage, water_usage, gas_usage, &prices)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RentBillOptions {
    pub deposit_months: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
}

impl Default for RentBillOptions {
    fn default() -> Self {
        Self {
            deposit_months: 1.0,
            key_deposit: 100.0,
            cleaning_fee: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RentCalculationResult {
    pub monthly_rent: f64,
    pub payment_cycle: PaymentCycle,
    pub cycle_months: u32,
    pub total_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
    pub total_amount: f64,
}

pub fn calculate_rent_bill(
    monthly_rent: f64,
    payment_cycle: &str,
    options: RentBillOptions,
) -> RentCalculationResult {
    let cycle = PaymentCycle::parse_lenient(Some(payment_cycle));
    let total_rent = round2(monthly_rent * f64::from(cycle.months()));
    let deposit = round2(monthly_rent * options.deposit_months);
    let key_deposit = round2(options.key_deposit);
    let cleaning_fee = round2(options.cleaning_fee);

    RentCalculationResult {
        monthly_rent,
        payment_cycle: cycle,
        cycle_months: cycle.months(),
        total_rent,
        deposit,
        key_deposit,
        cleaning_fee,
        total_amount: round2(total_rent + deposit + key_deposit + cleaning_fee),
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReminderLevel {
    Overdue,
    Urgent,
    Warning,
    Normal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReminderStatus {
    pub should_remind: bool,
    pub days_left: i64,
    pub status: ReminderLevel,
    pub message: String,
}

pub fn get_reminder_status(due_date: NaiveDate, today: NaiveDate, reminder_days: i64) -> ReminderStatus {
    let days_left = (due_date - today).num_days();
    let (status, message) = match days_left {
        d if d < 0 => (ReminderLevel::Overdue, format!("已逾期{}天", -d)),
        0 => (ReminderLevel::Urgent, "今天到期".to_string()),
        1..=3 => (ReminderLevel::Urgent, format!("还有{days_left}天到期")),
        4..=7 => (ReminderLevel::Warning, format!("还有{days_left}天到期")),
        _ => (ReminderLevel::Normal, format!("还有{days_left}天到期")),
    };

    ReminderStatus {
        should_remind: (0..=reminder_days).contains(&days_left),
        days_left,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        calculate_rent_bill, calculate_utility_bill, calculate_utility_bill_cached,
        get_reminder_status, resolve_meter_price, resolve_unit_price, round2, MeterPriceOverrides,
        ReminderLevel, RentBillOptions,
    };
    use crate::{
        models::{Meter, MeterType, PaymentCycle, PriceSource},
        services::settings::SettingsSnapshot,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(round2(17.499999), 17.5);
        assert_eq!(round2(-0.001), 0.0);
    }

    #[test]
    fn price_precedence_is_override_then_setting_then_default() {
        let from_meter = resolve_unit_price(Some(1.2), 0.8, 0.6);
        assert_eq!(from_meter.unit_price, 1.2);
        assert_eq!(from_meter.source, PriceSource::MeterConfig);

        let from_setting = resolve_unit_price(None, 0.8, 0.6);
        assert_eq!(from_setting.unit_price, 0.8);
        assert_eq!(from_setting.source, PriceSource::GlobalSetting);

        let fallback = resolve_unit_price(Some(0.0), f64::NAN, 0.6);
        assert_eq!(fallback.unit_price, 0.6);
    }

    #[test]
    fn omits_gas_when_not_used() {
        let snapshot = SettingsSnapshot::default();
        let result = calculate_utility_bill_cached(&snapshot, 50.0, 5.0, 0.0, None);
        assert_eq!(result.electricity_cost, 30.0);
        assert_eq!(result.water_cost, 17.5);
        assert_eq!(result.gas_cost, None);
        assert_eq!(result.total_cost, 47.5);

        let json = serde_json::to_value(&result).expect("serializable");
        assert!(json.get("gas_cost").is_none());
        assert!(json.get("gas_usage").is_none());
    }

    #[test]
    fn includes_gas_when_used() {
        let snapshot = SettingsSnapshot::default();
        let result = calculate_utility_bill_cached(&snapshot, 0.0, 0.0, 4.0, None);
        assert_eq!(result.gas_usage, Some(4.0));
        assert_eq!(result.gas_cost, Some(10.0));
        assert_eq!(result.total_cost, 10.0);
    }

    #[tokio::test]
    async fn live_and_cached_variants_agree() {
        let snapshots = [
            SettingsSnapshot::default(),
            SettingsSnapshot::from_pairs([
                ("electricity_price", "0.75"),
                ("water_price", "4.2"),
                ("gas_price", "3.1"),
            ]),
        ];
        let overrides = [
            None,
            Some(MeterPriceOverrides {
                electricity: Some(1.1),
                water: None,
                gas: Some(2.0),
            }),
        ];
        let usages = [(50.0, 5.0, 0.0), (123.45, 7.8, 3.3), (0.0, 0.0, 0.0)];

        for snapshot in &snapshots {
            for override_set in &overrides {
                for (electricity, water, gas) in usages {
                    let live = calculate_utility_bill(
                        snapshot,
                        electricity,
                        water,
                        gas,
                        override_set.as_ref(),
                    )
                    .await;
                    let cached = calculate_utility_bill_cached(
                        snapshot,
                        electricity,
                        water,
                        gas,
                        override_set.as_ref(),
                    );
                    assert_eq!(live, cached);
                }
            }
        }
    }

    #[test]
    fn rent_bill_uses_cycle_multiplier() {
        let result = calculate_rent_bill(1500.0, "quarterly", RentBillOptions::default());
        assert_eq!(result.cycle_months, 3);
        assert_eq!(result.total_rent, 4500.0);
        assert_eq!(result.deposit, 1500.0);
        assert_eq!(result.key_deposit, 100.0);
        assert_eq!(result.total_amount, 6100.0);

        let unknown = calculate_rent_bill(
            1000.0,
            "fortnightly",
            RentBillOptions {
                deposit_months: 2.0,
                key_deposit: 0.0,
                cleaning_fee: 50.0,
            },
        );
        assert_eq!(unknown.payment_cycle, PaymentCycle::Monthly);
        assert_eq!(unknown.total_rent, 1000.0);
        assert_eq!(unknown.deposit, 2000.0);
        assert_eq!(unknown.total_amount, 3050.0);
    }

    #[test]
    fn reminder_buckets() {
        let today = date(2026, 6, 1);
        let overdue = get_reminder_status(date(2026, 5, 30), today, 7);
        assert_eq!(overdue.status, ReminderLevel::Overdue);
        assert_eq!(overdue.days_left, -2);
        assert!(!overdue.should_remind);

        let due_today = get_reminder_status(today, today, 7);
        assert_eq!(due_today.status, ReminderLevel::Urgent);
        assert!(due_today.should_remind);

        let urgent = get_reminder_status(date(2026, 6, 4), today, 7);
        assert_eq!(urgent.status, ReminderLevel::Urgent);

        let warning = get_reminder_status(date(2026, 6, 8), today, 7);
        assert_eq!(warning.status, ReminderLevel::Warning);
        assert!(warning.should_remind);

        let normal = get_reminder_status(date(2026, 6, 9), today, 7);
        assert_eq!(normal.status, ReminderLevel::Normal);
        assert!(!normal.should_remind);
    }

    #[test]
    fn water_meters_share_the_water_price() {
        let settings = SettingsSnapshot::from_pairs([("water_price", "4.0")]).billing_settings();
        let mut meter = Meter {
            id: uuid::Uuid::new_v4(),
            room_id: uuid::Uuid::nil(),
            meter_type: MeterType::HotWater,
            display_name: "热水表".to_string(),
            unit_price: None,
            unit: "吨".to_string(),
            location: None,
            is_active: true,
            remarks: None,
        };
        let price = resolve_meter_price(&meter, &settings);
        assert_eq!(price.unit_price, 4.0);
        assert_eq!(price.source, PriceSource::GlobalSetting);

        meter.unit_price = Some(6.5);
        assert_eq!(resolve_meter_price(&meter, &settings).source, PriceSource::MeterConfig);
    }
}
