use chrono::NaiveDate;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Meter, MeterReading, MeterType, NewMeter, NewMeterReading, ReadingStatus},
    repository::map_db_error,
};

const METER_COLUMNS: &str =
    "id, room_id, meter_type, display_name, unit_price, unit, location, is_active, remarks";

const READING_COLUMNS: &str = "id, meter_id, contract_id, previous_reading, current_reading, \
     usage, unit_price, amount, reading_date, period, status, is_billed, operator, remarks, \
     created_at";

/// A reading joined with the meter it belongs to. Meter columns are optional
/// because the join is outer; callers drop rows without a meter.
#[derive(Debug, Clone, FromRow)]
pub struct ReadingRecord {
    pub id: Uuid,
    pub meter_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub reading_date: NaiveDate,
    pub period: Option<String>,
    pub status: ReadingStatus,
    pub is_billed: bool,
    pub meter_type: Option<MeterType>,
    pub meter_name: Option<String>,
    pub meter_unit: Option<String>,
    pub meter_unit_price: Option<f64>,
}

/// Billing state of one reading as seen by the consistency checker.
#[derive(Debug, Clone, FromRow)]
pub struct ReadingBillingState {
    pub id: Uuid,
    pub status: ReadingStatus,
    pub is_billed: bool,
    pub has_bill_reference: bool,
}

pub async fn list_room_meters(
    conn: &mut PgConnection,
    room_id: Uuid,
) -> Result<Vec<Meter>, AppError> {
    sqlx::query_as::<_, Meter>(&format!(
        "SELECT {METER_COLUMNS} FROM meters WHERE room_id = $1 ORDER BY meter_type, display_name"
    ))
    .bind(room_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn get_meter(conn: &mut PgConnection, meter_id: Uuid) -> Result<Option<Meter>, AppError> {
    sqlx::query_as::<_, Meter>(&format!("SELECT {METER_COLUMNS} FROM meters WHERE id = $1"))
        .bind(meter_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)
}

pub async fn insert_meter(conn: &mut PgConnection, meter: &NewMeter) -> Result<Meter, AppError> {
    sqlx::query_as::<_, Meter>(&format!(
        "INSERT INTO meters (room_id, meter_type, display_name, unit_price, unit, location, remarks)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {METER_COLUMNS}"
    ))
    .bind(meter.room_id)
    .bind(meter.meter_type)
    .bind(&meter.display_name)
    .bind(meter.unit_price)
    .bind(&meter.unit)
    .bind(&meter.location)
    .bind(&meter.remarks)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Most recent non-cancelled reading of a meter.
pub async fn latest_reading(
    conn: &mut PgConnection,
    meter_id: Uuid,
) -> Result<Option<MeterReading>, AppError> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "SELECT {READING_COLUMNS} FROM meter_readings
         WHERE meter_id = $1 AND status <> 'CANCELLED'
         ORDER BY reading_date DESC, created_at DESC
         LIMIT 1"
    ))
    .bind(meter_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Usage of the latest `limit` readings that moved the meter at all.
pub async fn recent_usages(
    conn: &mut PgConnection,
    meter_id: Uuid,
    limit: i64,
) -> Result<Vec<f64>, AppError> {
    sqlx::query_scalar::<_, f64>(
        "SELECT usage FROM meter_readings
         WHERE meter_id = $1 AND status <> 'CANCELLED' AND usage > 0
         ORDER BY reading_date DESC, created_at DESC
         LIMIT $2",
    )
    .bind(meter_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn insert_reading(
    conn: &mut PgConnection,
    reading: &NewMeterReading,
) -> Result<MeterReading, AppError> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "INSERT INTO meter_readings (
             meter_id, contract_id, previous_reading, current_reading, usage, unit_price, amount,
             reading_date, period, status, is_billed, operator, remarks
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         RETURNING {READING_COLUMNS}"
    ))
    .bind(reading.meter_id)
    .bind(reading.contract_id)
    .bind(reading.previous_reading)
    .bind(reading.current_reading)
    .bind(reading.usage)
    .bind(reading.unit_price)
    .bind(reading.amount)
    .bind(reading.reading_date)
    .bind(&reading.period)
    .bind(reading.status)
    .bind(reading.status == ReadingStatus::Billed)
    .bind(&reading.operator)
    .bind(&reading.remarks)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Loads readings with their meters and row-locks the readings, so two
/// billing runs over the same ids serialize.
pub async fn lock_reading_records(
    conn: &mut PgConnection,
    reading_ids: &[Uuid],
) -> Result<Vec<ReadingRecord>, AppError> {
    sqlx::query_as::<_, ReadingRecord>(
        "SELECT r.id, r.meter_id, r.contract_id, r.previous_reading, r.current_reading,
                r.usage, r.unit_price, r.amount, r.reading_date, r.period, r.status, r.is_billed,
                m.meter_type, m.display_name AS meter_name, m.unit AS meter_unit,
                m.unit_price AS meter_unit_price
         FROM meter_readings r
         LEFT JOIN meters m ON m.id = r.meter_id
         WHERE r.id = ANY($1)
         ORDER BY r.reading_date, m.meter_type, r.created_at
         FOR UPDATE OF r",
    )
    .bind(reading_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Flips unbilled readings to BILLED. Returns how many rows actually changed.
pub async fn mark_readings_billed(
    conn: &mut PgConnection,
    reading_ids: &[Uuid],
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE meter_readings SET status = 'BILLED', is_billed = true
         WHERE id = ANY($1) AND is_billed = false AND status <> 'CANCELLED'",
    )
    .bind(reading_ids)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

/// A reading is billed when a bill detail or a single-reading bill points at it.
pub async fn list_reading_billing_states(
    conn: &mut PgConnection,
) -> Result<Vec<ReadingBillingState>, AppError> {
    sqlx::query_as::<_, ReadingBillingState>(
        "SELECT r.id, r.status, r.is_billed,
                (EXISTS (SELECT 1 FROM bill_details d WHERE d.meter_reading_id = r.id)
                 OR EXISTS (SELECT 1 FROM bills b WHERE b.meter_reading_id = r.id))
                    AS has_bill_reference
         FROM meter_readings r
         WHERE r.status <> 'CANCELLED'
         ORDER BY r.reading_date, r.created_at",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Sets both billing flags at once so they cannot disagree afterwards.
pub async fn set_reading_billing_state(
    conn: &mut PgConnection,
    reading_ids: &[Uuid],
    billed: bool,
) -> Result<u64, AppError> {
    let status = if billed {
        ReadingStatus::Billed
    } else {
        ReadingStatus::Confirmed
    };
    let result = sqlx::query(
        "UPDATE meter_readings SET status = $2, is_billed = $3
         WHERE id = ANY($1) AND status <> 'CANCELLED'",
    )
    .bind(reading_ids)
    .bind(status)
    .bind(billed)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}
