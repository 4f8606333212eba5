use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Meter, MeterReading, MeterType, NewMeter, NewMeterReading, ReadingStatus},
    repository::{
        contracts as contracts_repo, map_db_error, meters as meters_repo, property as property_repo,
    },
    services::{
        bill_calculation::resolve_meter_price,
        meter_validation::{
            calculate_amount, calculate_usage, check_meter_limits, detect_abnormal_reading,
            validate_meter_config_data, validate_meter_reading_data, MeterConfigData, MeterLimits,
            MeterReadingData, ValidationReport,
        },
        settings::BillingSettings,
    },
    state::AppState,
};

/// Readings whose usage feeds the anomaly baseline.
const USAGE_HISTORY_LIMIT: i64 = 6;

fn reject_invalid(report: &ValidationReport) -> AppResult<()> {
    if report.is_valid {
        Ok(())
    } else {
        Err(AppError::UnprocessableEntity(report.errors.join("；")))
    }
}

pub async fn create_meter(
    state: &AppState,
    room_id: Uuid,
    data: MeterConfigData,
) -> AppResult<Meter> {
    reject_invalid(&validate_meter_config_data(&data))?;
    let meter_type = MeterType::parse(&data.meter_type)
        .ok_or_else(|| AppError::UnprocessableEntity("仪表类型无效".to_string()))?;

    let pool = state.db_pool()?;
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    property_repo::lock_room(&mut tx, room_id)
        .await?
        .ok_or_else(|| AppError::NotFound("房间不存在".to_string()))?;

    let existing = meters_repo::list_room_meters(&mut tx, room_id).await?;
    let limits = MeterLimits {
        max_per_room: state.config.max_meters_per_room,
        max_per_type: state.config.max_meters_per_type,
    };
    let report = check_meter_limits(&existing, meter_type, &data.display_name, limits);
    if !report.is_valid {
        return Err(AppError::Conflict(report.errors.join("；")));
    }

    let meter = meters_repo::insert_meter(
        &mut tx,
        &NewMeter {
            room_id,
            meter_type,
            display_name: data.display_name.trim().to_string(),
            unit_price: data.unit_price,
            unit: data
                .unit
                .as_deref()
                .map(str::trim)
                .filter(|unit| !unit.is_empty())
                .unwrap_or(meter_type.default_unit())
                .to_string(),
            location: data.location,
            remarks: data.remarks,
        },
    )
    .await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(room_id = %room_id, meter_id = %meter.id, meter_type = meter_type.as_str(), "Meter created");
    Ok(meter)
}

#[derive(Debug, Clone)]
pub struct RecordReadingRequest {
    pub current_reading: f64,
    pub reading_date: NaiveDate,
    /// Per-reading price; otherwise the meter's own price, then the setting.
    pub unit_price: Option<f64>,
    pub period: Option<String>,
    pub confirm_abnormal: bool,
    pub operator: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedReading {
    pub reading: MeterReading,
    pub warnings: Vec<String>,
}

/// Validates a reading against the meter's previous reading and usage
/// history. Hard errors reject it; anomalies only pass once confirmed.
pub fn check_reading(
    request: &RecordReadingRequest,
    meter_id: Uuid,
    previous: Option<&MeterReading>,
    recent_usages: &[f64],
    today: NaiveDate,
) -> AppResult<Vec<String>> {
    let mut report = validate_meter_reading_data(
        &MeterReadingData {
            meter_id: Some(meter_id),
            current_reading: request.current_reading,
            previous_reading: previous.map(|reading| reading.current_reading),
            reading_date: request.reading_date,
            unit_price: request.unit_price,
        },
        recent_usages,
        today,
    );
    if let Some(previous) = previous.filter(|previous| request.reading_date < previous.reading_date)
    {
        report.add_error(format!(
            "抄表日期不能早于上次抄表日期{}",
            previous.reading_date
        ));
    }
    reject_invalid(&report)?;

    let previous_value = previous.map(|reading| reading.current_reading);
    if !request.confirm_abnormal
        && detect_abnormal_reading(request.current_reading, previous_value, recent_usages)
    {
        return Err(AppError::UnprocessableEntity(format!(
            "读数异常，请确认后重新提交：{}",
            report.warnings.join("；")
        )));
    }
    Ok(report.warnings)
}

pub fn plan_reading(
    meter: &Meter,
    previous: Option<&MeterReading>,
    request: &RecordReadingRequest,
    settings: &BillingSettings,
    contract_id: Option<Uuid>,
) -> NewMeterReading {
    let previous_value = previous.map(|reading| reading.current_reading);
    let usage = calculate_usage(request.current_reading, previous_value);
    let unit_price = request
        .unit_price
        .unwrap_or_else(|| resolve_meter_price(meter, settings).unit_price);

    NewMeterReading {
        meter_id: meter.id,
        contract_id,
        previous_reading: previous_value.unwrap_or(request.current_reading),
        current_reading: request.current_reading,
        usage,
        unit_price,
        amount: calculate_amount(usage, unit_price),
        reading_date: request.reading_date,
        period: request
            .period
            .clone()
            .or_else(|| Some(request.reading_date.format("%Y-%m").to_string())),
        status: ReadingStatus::Confirmed,
        operator: request.operator.clone(),
        remarks: request.remarks.clone(),
    }
}

pub async fn record_reading(
    state: &AppState,
    meter_id: Uuid,
    request: RecordReadingRequest,
) -> AppResult<RecordedReading> {
    let pool = state.db_pool()?;
    let settings = state.settings.get_billing_settings().await;
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let meter = meters_repo::get_meter(&mut tx, meter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("仪表不存在".to_string()))?;
    if !meter.is_active {
        return Err(AppError::Conflict(format!(
            "仪表已停用：{}",
            meter.display_name
        )));
    }

    let previous = meters_repo::latest_reading(&mut tx, meter.id).await?;
    let recent = meters_repo::recent_usages(&mut tx, meter.id, USAGE_HISTORY_LIMIT).await?;
    let warnings = check_reading(
        &request,
        meter.id,
        previous.as_ref(),
        &recent,
        state.config.today(),
    )?;

    let contract = contracts_repo::find_active_contract_for_room(&mut tx, meter.room_id, None).await?;
    let planned = plan_reading(
        &meter,
        previous.as_ref(),
        &request,
        &settings,
        contract.map(|contract| contract.id),
    );
    let reading = meters_repo::insert_reading(&mut tx, &planned).await?;
    tx.commit().await.map_err(map_db_error)?;

    if !warnings.is_empty() {
        tracing::warn!(
            meter_id = %meter.id,
            reading_id = %reading.id,
            warnings = warnings.join("；"),
            "Abnormal reading confirmed by operator"
        );
    }
    Ok(RecordedReading { reading, warnings })
}
