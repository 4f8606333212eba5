use chrono::{NaiveDate, Utc};
use sqlx::{types::Json, PgConnection};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Bill, BillDetail, BillType, NewBill, NewBillDetail},
    repository::map_db_error,
    services::bill_numbers::{format_bill_number, number_suffix, MAX_NUMBER_ATTEMPTS},
};

const BILL_COLUMNS: &str = "id, bill_number, bill_type, amount, received_amount, pending_amount, \
     due_date, paid_date, period, status, contract_id, meter_reading_id, payment_method, \
     operator, remarks, metadata, created_at";

const DETAIL_COLUMNS: &str = "id, bill_id, meter_reading_id, meter_type, meter_name, usage, \
     unit_price, amount, previous_reading, current_reading, reading_date, price_source";

/// Inserts a bill under a freshly generated number. A number already taken
/// yields no row (`ON CONFLICT DO NOTHING`) and the insert is retried.
pub async fn insert_bill(
    conn: &mut PgConnection,
    contract_number: &str,
    bill: &NewBill,
) -> Result<Bill, AppError> {
    for attempt in 0..MAX_NUMBER_ATTEMPTS {
        let bill_number = format_bill_number(
            contract_number,
            bill.bill_type,
            number_suffix(Utc::now(), attempt),
        );
        let inserted = sqlx::query_as::<_, Bill>(&format!(
            "INSERT INTO bills (
                 bill_number, bill_type, amount, received_amount, pending_amount, due_date,
                 paid_date, period, status, contract_id, meter_reading_id, payment_method,
                 operator, remarks, metadata
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (bill_number) DO NOTHING
             RETURNING {BILL_COLUMNS}"
        ))
        .bind(&bill_number)
        .bind(bill.bill_type)
        .bind(bill.amount)
        .bind(bill.received_amount)
        .bind(bill.pending_amount())
        .bind(bill.due_date)
        .bind(bill.paid_date)
        .bind(&bill.period)
        .bind(bill.status)
        .bind(bill.contract_id)
        .bind(bill.meter_reading_id)
        .bind(&bill.payment_method)
        .bind(&bill.operator)
        .bind(&bill.remarks)
        .bind(bill.metadata.clone().map(Json))
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

        if let Some(inserted) = inserted {
            return Ok(inserted);
        }
        tracing::warn!(bill_number = %bill_number, attempt, "Bill number collision, retrying");
    }

    Err(AppError::Conflict(
        "Could not allocate a unique bill number.".to_string(),
    ))
}

pub async fn insert_bill_detail(
    conn: &mut PgConnection,
    bill_id: Uuid,
    detail: &NewBillDetail,
) -> Result<BillDetail, AppError> {
    sqlx::query_as::<_, BillDetail>(&format!(
        "INSERT INTO bill_details (
             bill_id, meter_reading_id, meter_type, meter_name, usage, unit_price, amount,
             previous_reading, current_reading, reading_date, price_source
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING {DETAIL_COLUMNS}"
    ))
    .bind(bill_id)
    .bind(detail.meter_reading_id)
    .bind(detail.meter_type)
    .bind(&detail.meter_name)
    .bind(detail.usage)
    .bind(detail.unit_price)
    .bind(detail.amount)
    .bind(detail.previous_reading)
    .bind(detail.current_reading)
    .bind(detail.reading_date)
    .bind(detail.price_source)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn get_bill(conn: &mut PgConnection, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
    sqlx::query_as::<_, Bill>(&format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = $1"))
        .bind(bill_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)
}

pub async fn list_bills_for_contract(
    conn: &mut PgConnection,
    contract_id: Uuid,
) -> Result<Vec<Bill>, AppError> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills
         WHERE contract_id = $1
         ORDER BY due_date, created_at"
    ))
    .bind(contract_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn count_bills_of_type(
    conn: &mut PgConnection,
    contract_id: Uuid,
    bill_type: BillType,
) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM bills WHERE contract_id = $1 AND bill_type = $2",
    )
    .bind(contract_id)
    .bind(bill_type)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Marks every PENDING/OVERDUE bill of the contract as fully received.
pub async fn settle_open_bills(
    conn: &mut PgConnection,
    contract_id: Uuid,
    paid_on: NaiveDate,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE bills
         SET status = 'PAID', received_amount = amount, pending_amount = 0, paid_date = $2
         WHERE contract_id = $1 AND status IN ('PENDING', 'OVERDUE')",
    )
    .bind(contract_id)
    .bind(paid_on)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn mark_overdue_bills(conn: &mut PgConnection, today: NaiveDate) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE bills SET status = 'OVERDUE'
         WHERE status = 'PENDING' AND due_date < $1 AND pending_amount > 0",
    )
    .bind(today)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}
