use chrono::{NaiveDate, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Contract, ContractStatus, NewContract},
    repository::map_db_error,
    services::bill_numbers::{format_contract_number, number_suffix, MAX_NUMBER_ATTEMPTS},
};

const CONTRACT_COLUMNS: &str = "id, contract_number, room_id, renter_id, start_date, end_date, \
     monthly_rent, total_rent, deposit, key_deposit, cleaning_fee, status, business_status, \
     payment_method, payment_timing, signed_by, signed_date, renewed_from_id, remarks, \
     created_at, updated_at";

pub async fn get_contract(
    conn: &mut PgConnection,
    contract_id: Uuid,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = $1"
    ))
    .bind(contract_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Row-locks the contract for the rest of the caller's transaction.
pub async fn lock_contract(
    conn: &mut PgConnection,
    contract_id: Uuid,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = $1 FOR UPDATE"
    ))
    .bind(contract_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn insert_contract(
    conn: &mut PgConnection,
    contract: &NewContract,
) -> Result<Contract, AppError> {
    let signed_on = contract.signed_date.unwrap_or_else(|| Utc::now().date_naive());

    for attempt in 0..MAX_NUMBER_ATTEMPTS {
        let contract_number = format_contract_number(signed_on, number_suffix(Utc::now(), attempt));
        let inserted = sqlx::query_as::<_, Contract>(&format!(
            "INSERT INTO contracts (
                 contract_number, room_id, renter_id, start_date, end_date, monthly_rent,
                 total_rent, deposit, key_deposit, cleaning_fee, status, business_status,
                 payment_method, payment_timing, signed_by, signed_date, renewed_from_id, remarks
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             ON CONFLICT (contract_number) DO NOTHING
             RETURNING {CONTRACT_COLUMNS}"
        ))
        .bind(&contract_number)
        .bind(contract.room_id)
        .bind(contract.renter_id)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.monthly_rent)
        .bind(contract.total_rent)
        .bind(contract.deposit)
        .bind(contract.key_deposit)
        .bind(contract.cleaning_fee)
        .bind(contract.status)
        .bind(&contract.business_status)
        .bind(&contract.payment_method)
        .bind(&contract.payment_timing)
        .bind(&contract.signed_by)
        .bind(contract.signed_date)
        .bind(contract.renewed_from_id)
        .bind(&contract.remarks)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

        if let Some(inserted) = inserted {
            return Ok(inserted);
        }
        tracing::warn!(contract_number = %contract_number, attempt, "Contract number collision, retrying");
    }

    Err(AppError::Conflict(
        "Could not allocate a unique contract number.".to_string(),
    ))
}

pub async fn find_active_contract_for_renter(
    conn: &mut PgConnection,
    renter_id: Uuid,
    excluding: Option<Uuid>,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts
         WHERE renter_id = $1 AND status = 'ACTIVE' AND ($2::uuid IS NULL OR id <> $2)
         LIMIT 1"
    ))
    .bind(renter_id)
    .bind(excluding)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn find_active_contract_for_room(
    conn: &mut PgConnection,
    room_id: Uuid,
    excluding: Option<Uuid>,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts
         WHERE room_id = $1 AND status = 'ACTIVE' AND ($2::uuid IS NULL OR id <> $2)
         LIMIT 1"
    ))
    .bind(room_id)
    .bind(excluding)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// A PENDING contract on the room whose term overlaps `[start_date, end_date]`.
pub async fn find_overlapping_pending_contract(
    conn: &mut PgConnection,
    room_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts
         WHERE room_id = $1 AND status = 'PENDING' AND start_date <= $3 AND end_date >= $2
         LIMIT 1"
    ))
    .bind(room_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

/// Compare-and-set on `status`; `None` when the contract is no longer in `from`.
pub async fn transition_contract(
    conn: &mut PgConnection,
    contract_id: Uuid,
    from: ContractStatus,
    to: ContractStatus,
    business_status: &str,
    remarks: Option<&str>,
) -> Result<Option<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "UPDATE contracts
         SET status = $3, business_status = $4, remarks = COALESCE($5, remarks), updated_at = now()
         WHERE id = $1 AND status = $2
         RETURNING {CONTRACT_COLUMNS}"
    ))
    .bind(contract_id)
    .bind(from)
    .bind(to)
    .bind(business_status)
    .bind(remarks)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn list_contracts_due_to_start(
    conn: &mut PgConnection,
    today: NaiveDate,
) -> Result<Vec<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts
         WHERE status = 'PENDING' AND start_date <= $1
         ORDER BY start_date, created_at"
    ))
    .bind(today)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn list_contracts_past_end(
    conn: &mut PgConnection,
    today: NaiveDate,
) -> Result<Vec<Contract>, AppError> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM contracts
         WHERE status = 'ACTIVE' AND end_date < $1
         ORDER BY end_date, created_at"
    ))
    .bind(today)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_error)
}
