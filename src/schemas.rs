use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    services::{bill_calculation::MeterPriceOverrides, settlement::LineOverride},
};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

fn default_true() -> bool {
    true
}
fn default_payment_cycle() -> String {
    "monthly".to_string()
}
fn default_deposit_months() -> f64 {
    1.0
}
fn default_key_deposit() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractPath {
    pub contract_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillPath {
    pub bill_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomPath {
    pub room_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterPath {
    pub meter_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingKeyPath {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingCategoryPath {
    pub category: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateContractInput {
    pub room_id: Uuid,
    pub renter_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[validate(range(exclusive_min = 0.0))]
    pub monthly_rent: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub deposit: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub key_deposit: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cleaning_fee: f64,
    #[validate(length(max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 50))]
    pub payment_timing: Option<String>,
    #[validate(length(max = 100))]
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
    #[serde(default = "default_true")]
    pub generate_bills: bool,
    /// Baseline readings keyed by meter id or meter type.
    #[serde(default)]
    pub meter_readings: BTreeMap<String, f64>,
    #[validate(length(max = 100))]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RenewContractInput {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[validate(range(exclusive_min = 0.0))]
    pub monthly_rent: Option<f64>,
    #[validate(range(min = 0.0))]
    pub deposit: Option<f64>,
    #[validate(range(min = 0.0))]
    pub key_deposit: Option<f64>,
    #[validate(range(min = 0.0))]
    pub cleaning_fee: Option<f64>,
    #[validate(length(max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 50))]
    pub payment_timing: Option<String>,
    #[validate(length(max = 100))]
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
    #[serde(default = "default_true")]
    pub generate_bills: bool,
    #[validate(length(max = 100))]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutInput {
    pub checkout_date: NaiveDate,
    #[validate(length(max = 200))]
    pub checkout_reason: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub damage_assessment: f64,
    #[serde(default)]
    pub final_meter_readings: BTreeMap<String, f64>,
    #[validate(length(max = 2000))]
    pub remarks: Option<String>,
    #[validate(length(max = 100))]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SettlementPreviewInput {
    pub checkout_date: NaiveDate,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub damage_assessment: f64,
    /// Rent actually collected; defaults to the contract's total rent.
    #[validate(range(min = 0.0))]
    pub paid_rent: Option<f64>,
    #[serde(default)]
    pub overrides: Vec<LineOverride>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateUtilityBillsInput {
    #[validate(length(min = 1, max = 500))]
    pub reading_ids: Vec<Uuid>,
    /// `SINGLE` or `AGGREGATED`; chosen from the readings when absent.
    pub aggregation_mode: Option<String>,
    #[validate(range(min = 0, max = 90))]
    pub due_days: Option<i64>,
    #[validate(length(max = 100))]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UtilityPreviewInput {
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub electricity_usage: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub water_usage: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub gas_usage: f64,
    #[serde(default)]
    pub prices: MeterPriceOverrides,
    /// Settings the client cached earlier; the live store is used when absent.
    pub settings_snapshot: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RentPreviewInput {
    #[validate(range(exclusive_min = 0.0))]
    pub monthly_rent: f64,
    #[serde(default = "default_payment_cycle")]
    pub payment_cycle: String,
    #[serde(default = "default_deposit_months")]
    #[validate(range(min = 0.0, max = 12.0))]
    pub deposit_months: f64,
    #[serde(default = "default_key_deposit")]
    #[validate(range(min = 0.0))]
    pub key_deposit: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub cleaning_fee: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordReadingInput {
    #[validate(range(min = 0.0))]
    pub current_reading: f64,
    /// Defaults to today in the business timezone.
    pub reading_date: Option<NaiveDate>,
    pub unit_price: Option<f64>,
    #[validate(length(max = 50))]
    pub period: Option<String>,
    #[serde(default)]
    pub confirm_abnormal: bool,
    #[validate(length(max = 100))]
    pub operator: Option<String>,
    #[validate(length(max = 500))]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsistencyQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingInput {
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingsInput {
    pub settings: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{validate_input, CreateContractInput, GenerateUtilityBillsInput, RentPreviewInput};

    #[test]
    fn contract_input_defaults_and_validation() {
        let input: CreateContractInput = serde_json::from_value(json!({
            "room_id": "7f1c7a1e-6a38-4b43-a0f0-2c9d5b1ff001",
            "renter_id": "7f1c7a1e-6a38-4b43-a0f0-2c9d5b1ff002",
            "start_date": "2026-03-01",
            "end_date": "2027-02-28",
            "monthly_rent": 1500,
            "meter_readings": { "ELECTRICITY": 1200.5 }
        }))
        .expect("valid payload");
        assert!(input.generate_bills);
        assert_eq!(input.deposit, 0.0);
        assert_eq!(input.meter_readings.get("ELECTRICITY"), Some(&1200.5));
        assert!(validate_input(&input).is_ok());

        let free = CreateContractInput {
            monthly_rent: 0.0,
            ..input
        };
        assert!(validate_input(&free).is_err());
    }

    #[test]
    fn utility_billing_needs_readings() {
        let input: GenerateUtilityBillsInput =
            serde_json::from_value(json!({ "reading_ids": [] })).expect("valid payload");
        assert!(validate_input(&input).is_err());
    }

    #[test]
    fn rent_preview_defaults() {
        let input: RentPreviewInput =
            serde_json::from_value(json!({ "monthly_rent": 1500 })).expect("valid payload");
        assert_eq!(input.payment_cycle, "monthly");
        assert_eq!(input.deposit_months, 1.0);
        assert_eq!(input.key_deposit, 100.0);
    }
}
