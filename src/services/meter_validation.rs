use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::{Meter, MeterType},
    services::bill_calculation::round2,
};

pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_UNIT_LEN: usize = 10;
pub const MAX_LOCATION_LEN: usize = 100;
pub const MAX_REMARKS_LEN: usize = 500;
pub const MIN_UNIT_PRICE: f64 = 0.01;
pub const MAX_UNIT_PRICE: f64 = 100.0;

pub const MAX_READING_VALUE: f64 = 999_999.99;
pub const MAX_USAGE_PER_PERIOD: f64 = 10_000.0;
pub const ANOMALY_MULTIPLIER: f64 = 3.0;
pub const MIN_HISTORY_SAMPLES: usize = 3;

/// Outcome of a validator. Errors block the operation; warnings are for the
/// operator to confirm.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ValidationReport {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterConfigData {
    pub display_name: String,
    pub meter_type: String,
    pub unit_price: Option<f64>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub remarks: Option<String>,
}

fn is_allowed_name_char(character: char) -> bool {
    character.is_alphanumeric()
        || matches!(character, ' ' | '-' | '_' | '#' | '(' | ')' | '（' | '）')
}

pub fn validate_meter_config_data(data: &MeterConfigData) -> ValidationReport {
    let mut report = ValidationReport::default();

    let name = data.display_name.trim();
    if name.is_empty() {
        report.add_error("仪表名称不能为空");
    } else {
        if name.chars().count() > MAX_DISPLAY_NAME_LEN {
            report.add_error(format!("仪表名称不能超过{MAX_DISPLAY_NAME_LEN}个字符"));
        }
        if !name.chars().all(is_allowed_name_char) {
            report.add_error("仪表名称只能包含中文、字母、数字、空格、括号、#、-和_");
        }
    }

    if MeterType::parse(&data.meter_type).is_none() {
        report.add_error(format!("无效的仪表类型：{}", data.meter_type.trim()));
    }

    if let Some(price) = data.unit_price {
        if !price.is_finite() || !(MIN_UNIT_PRICE..=MAX_UNIT_PRICE).contains(&price) {
            report.add_error(format!(
                "单价必须在{MIN_UNIT_PRICE}到{MAX_UNIT_PRICE}之间"
            ));
        }
    }

    if let Some(unit) = data.unit.as_deref() {
        let unit = unit.trim();
        if unit.is_empty() || unit.chars().count() > MAX_UNIT_LEN {
            report.add_error(format!("计量单位长度必须在1到{MAX_UNIT_LEN}个字符之间"));
        }
    }

    if data
        .location
        .as_deref()
        .is_some_and(|location| location.chars().count() > MAX_LOCATION_LEN)
    {
        report.add_error(format!("安装位置不能超过{MAX_LOCATION_LEN}个字符"));
    }

    if data
        .remarks
        .as_deref()
        .is_some_and(|remarks| remarks.chars().count() > MAX_REMARKS_LEN)
    {
        report.add_error(format!("备注不能超过{MAX_REMARKS_LEN}个字符"));
    }

    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterLimits {
    pub max_per_room: usize,
    pub max_per_type: usize,
}

impl Default for MeterLimits {
    fn default() -> Self {
        Self {
            max_per_room: 10,
            max_per_type: 3,
        }
    }
}

/// Business caps for a room's meters. Only active meters count.
pub fn check_meter_limits(
    existing_meters: &[Meter],
    new_meter_type: MeterType,
    new_display_name: &str,
    limits: MeterLimits,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let active = existing_meters
        .iter()
        .filter(|meter| meter.is_active)
        .collect::<Vec<_>>();

    if active.len() >= limits.max_per_room {
        report.add_error(format!(
            "每个房间最多{}个仪表，当前已有{}个",
            limits.max_per_room,
            active.len()
        ));
    }

    let same_type = active
        .iter()
        .filter(|meter| meter.meter_type == new_meter_type)
        .count();
    if same_type >= limits.max_per_type {
        report.add_error(format!(
            "{}最多{}个，当前已有{}个",
            new_meter_type.display_name(),
            limits.max_per_type,
            same_type
        ));
    }

    let wanted = new_display_name.trim().to_lowercase();
    if active
        .iter()
        .any(|meter| meter.display_name.trim().to_lowercase() == wanted)
    {
        report.add_error(format!("仪表名称已存在：{}", new_display_name.trim()));
    }

    report
}

/// Never negative: a missing baseline or a regression both yield 0.
pub fn calculate_usage(current: f64, previous: Option<f64>) -> f64 {
    match previous {
        None => 0.0,
        Some(previous) => round2((current - previous).max(0.0)),
    }
}

pub fn calculate_amount(usage: f64, unit_price: f64) -> f64 {
    round2(usage * unit_price)
}

/// Reasons a reading looks wrong; empty means it looks normal.
/// `recent_usages` is the usage of the meter's latest readings.
pub fn abnormal_reading_reasons(
    current: f64,
    previous: Option<f64>,
    recent_usages: &[f64],
) -> Vec<String> {
    let mut reasons = Vec::new();

    if current > MAX_READING_VALUE {
        reasons.push(format!("读数超过最大值{MAX_READING_VALUE}"));
    }

    let Some(previous) = previous else {
        return reasons;
    };

    if current < previous {
        reasons.push(format!("本期读数{current}小于上期读数{previous}"));
        return reasons;
    }

    let usage = current - previous;
    if usage > MAX_USAGE_PER_PERIOD {
        reasons.push(format!("单期用量{usage}超过上限{MAX_USAGE_PER_PERIOD}"));
    }

    if recent_usages.len() >= MIN_HISTORY_SAMPLES {
        let average = recent_usages.iter().sum::<f64>() / recent_usages.len() as f64;
        if average > 0.0 && usage > average * ANOMALY_MULTIPLIER {
            reasons.push(format!(
                "用量{}超过历史平均用量{}的{}倍",
                round2(usage),
                round2(average),
                ANOMALY_MULTIPLIER
            ));
        }
    }

    reasons
}

pub fn detect_abnormal_reading(current: f64, previous: Option<f64>, recent_usages: &[f64]) -> bool {
    !abnormal_reading_reasons(current, previous, recent_usages).is_empty()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterReadingData {
    pub meter_id: Option<Uuid>,
    pub current_reading: f64,
    pub previous_reading: Option<f64>,
    pub reading_date: NaiveDate,
    pub unit_price: Option<f64>,
}

/// Single entry point before a reading is persisted. Hard problems are
/// errors; anomalies are warnings the operator has to confirm.
pub fn validate_meter_reading_data(
    data: &MeterReadingData,
    recent_usages: &[f64],
    today: NaiveDate,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if data.meter_id.is_none() {
        report.add_error("缺少仪表");
    }
    if !data.current_reading.is_finite() || data.current_reading < 0.0 {
        report.add_error("本期读数必须是非负数");
    } else if data.current_reading > MAX_READING_VALUE {
        report.add_error(format!("读数不能超过{MAX_READING_VALUE}"));
    }
    if data
        .previous_reading
        .is_some_and(|previous| !previous.is_finite() || previous < 0.0)
    {
        report.add_error("上期读数必须是非负数");
    }
    if data.reading_date > today {
        report.add_error("抄表日期不能晚于今天");
    }
    if let Some(price) = data.unit_price {
        if !price.is_finite() || !(MIN_UNIT_PRICE..=MAX_UNIT_PRICE).contains(&price) {
            report.add_error(format!(
                "单价必须在{MIN_UNIT_PRICE}到{MAX_UNIT_PRICE}之间"
            ));
        }
    }

    if report.is_valid {
        for reason in
            abnormal_reading_reasons(data.current_reading, data.previous_reading, recent_usages)
        {
            report.add_warning(reason);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{
        calculate_amount, calculate_usage, check_meter_limits, detect_abnormal_reading,
        validate_meter_config_data, validate_meter_reading_data, MeterConfigData, MeterLimits,
        MeterReadingData,
    };
    use crate::models::{Meter, MeterType};

    fn meter(meter_type: MeterType, name: &str) -> Meter {
        Meter {
            id: Uuid::new_v4(),
            room_id: Uuid::nil(),
            meter_type,
            display_name: name.to_string(),
            unit_price: None,
            unit: meter_type.default_unit().to_string(),
            location: None,
            is_active: true,
            remarks: None,
        }
    }

    #[test]
    fn usage_is_never_negative() {
        assert_eq!(calculate_usage(100.0, None), 0.0);
        assert_eq!(calculate_usage(100.0, Some(150.0)), 0.0);
        assert_eq!(calculate_usage(150.0, Some(100.0)), 50.0);
    }

    #[test]
    fn amount_rounds_to_cents() {
        assert_eq!(calculate_amount(50.0, 0.6), 30.0);
        assert_eq!(calculate_amount(3.333, 3.5), 11.67);
    }

    #[test]
    fn accepts_well_formed_meter_config() {
        let report = validate_meter_config_data(&MeterConfigData {
            display_name: "主卧电表(1)".to_string(),
            meter_type: "electricity".to_string(),
            unit_price: Some(0.65),
            unit: Some("度".to_string()),
            location: Some("门口".to_string()),
            remarks: None,
        });
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn rejects_bad_meter_config() {
        let report = validate_meter_config_data(&MeterConfigData {
            display_name: "bad<name>".to_string(),
            meter_type: "STEAM".to_string(),
            unit_price: Some(150.0),
            unit: Some(String::new()),
            location: Some("x".repeat(101)),
            remarks: None,
        });
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 5);
    }

    #[test]
    fn enforces_meter_limits() {
        let existing = vec![
            meter(MeterType::Electricity, "电表1"),
            meter(MeterType::Electricity, "电表2"),
            meter(MeterType::Electricity, "电表3"),
        ];
        let report = check_meter_limits(
            &existing,
            MeterType::Electricity,
            "电表4",
            MeterLimits::default(),
        );
        assert!(!report.is_valid);

        let report = check_meter_limits(
            &existing,
            MeterType::ColdWater,
            "电表1",
            MeterLimits::default(),
        );
        assert_eq!(report.errors.len(), 1);

        let report = check_meter_limits(
            &existing,
            MeterType::ColdWater,
            "冷水表",
            MeterLimits {
                max_per_room: 3,
                max_per_type: 3,
            },
        );
        assert!(!report.is_valid);

        let report = check_meter_limits(
            &existing,
            MeterType::Gas,
            "燃气表",
            MeterLimits::default(),
        );
        assert!(report.is_valid);
    }

    #[test]
    fn inactive_meters_do_not_count() {
        let mut retired = meter(MeterType::Gas, "燃气表");
        retired.is_active = false;
        let report = check_meter_limits(
            &[retired],
            MeterType::Gas,
            "燃气表",
            MeterLimits {
                max_per_room: 1,
                max_per_type: 1,
            },
        );
        assert!(report.is_valid);
    }

    #[test]
    fn flags_abnormal_readings() {
        assert!(detect_abnormal_reading(1_000_000.0, Some(10.0), &[]));
        assert!(detect_abnormal_reading(90.0, Some(100.0), &[]));
        assert!(detect_abnormal_reading(20_100.0, Some(100.0), &[]));
        assert!(detect_abnormal_reading(200.0, Some(100.0), &[20.0, 25.0, 30.0]));
        assert!(!detect_abnormal_reading(160.0, Some(100.0), &[20.0, 25.0, 30.0]));
        // Too little history to judge a spike.
        assert!(!detect_abnormal_reading(200.0, Some(100.0), &[20.0, 25.0]));
        assert!(!detect_abnormal_reading(120.0, None, &[]));
    }

    #[test]
    fn reading_validation_blocks_future_dates_and_warns_on_anomalies() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).expect("valid date");
        let future = validate_meter_reading_data(
            &MeterReadingData {
                meter_id: Some(Uuid::new_v4()),
                current_reading: 120.0,
                previous_reading: Some(100.0),
                reading_date: today + chrono::Duration::days(1),
                unit_price: None,
            },
            &[],
            today,
        );
        assert!(!future.is_valid);

        let spike = validate_meter_reading_data(
            &MeterReadingData {
                meter_id: Some(Uuid::new_v4()),
                current_reading: 80.0,
                previous_reading: Some(100.0),
                reading_date: today,
                unit_price: Some(0.6),
            },
            &[],
            today,
        );
        assert!(spike.is_valid);
        assert_eq!(spike.warnings.len(), 1);
    }
}
