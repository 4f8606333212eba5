use chrono::NaiveDate;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Renter, Room},
    repository::map_db_error,
};

const ROOM_COLUMNS: &str = "id, room_number, floor_number, building_id, room_type, area, rent, \
     status, current_renter, overdue_days";

const RENTER_COLUMNS: &str =
    "id, name, phone, email, id_card, move_in_date, tenant_count, remarks";

/// Serializes contract creation per room: the lock holds until the caller commits.
pub async fn lock_room(conn: &mut PgConnection, room_id: Uuid) -> Result<Option<Room>, AppError> {
    sqlx::query_as::<_, Room>(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1 FOR UPDATE"
    ))
    .bind(room_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn occupy_room(
    conn: &mut PgConnection,
    room_id: Uuid,
    renter_name: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE rooms SET status = 'OCCUPIED', current_renter = $2, overdue_days = 0
         WHERE id = $1",
    )
    .bind(room_id)
    .bind(renter_name)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

pub async fn vacate_room(conn: &mut PgConnection, room_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE rooms SET status = 'VACANT', current_renter = NULL, overdue_days = 0
         WHERE id = $1",
    )
    .bind(room_id)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

/// Recomputes `overdue_days` for rooms under an active contract from their
/// oldest unpaid past-due bill. Rooms flip OCCUPIED <-> OVERDUE accordingly.
pub async fn refresh_overdue_days(
    conn: &mut PgConnection,
    today: NaiveDate,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE rooms r
         SET overdue_days = COALESCE(o.days, 0),
             status = CASE
                 WHEN COALESCE(o.days, 0) > 0 AND r.status = 'OCCUPIED' THEN 'OVERDUE'
                 WHEN COALESCE(o.days, 0) = 0 AND r.status = 'OVERDUE' THEN 'OCCUPIED'
                 ELSE r.status
             END
         FROM (
             SELECT c.room_id, MAX($1::date - b.due_date) AS days
             FROM contracts c
             LEFT JOIN bills b
                 ON b.contract_id = c.id
                 AND b.status IN ('PENDING', 'OVERDUE')
                 AND b.due_date < $1
                 AND b.pending_amount > 0
             WHERE c.status = 'ACTIVE'
             GROUP BY c.room_id
         ) o
         WHERE r.id = o.room_id",
    )
    .bind(today)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn lock_renter(
    conn: &mut PgConnection,
    renter_id: Uuid,
) -> Result<Option<Renter>, AppError> {
    sqlx::query_as::<_, Renter>(&format!(
        "SELECT {RENTER_COLUMNS} FROM renters WHERE id = $1 FOR UPDATE"
    ))
    .bind(renter_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_error)
}

pub async fn update_renter_remarks(
    conn: &mut PgConnection,
    renter_id: Uuid,
    remarks: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE renters SET remarks = $2 WHERE id = $1")
        .bind(renter_id)
        .bind(remarks)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

/// Keeps the first move-in date; later contracts do not overwrite it.
pub async fn record_move_in(
    conn: &mut PgConnection,
    renter_id: Uuid,
    move_in: NaiveDate,
) -> Result<(), AppError> {
    sqlx::query("UPDATE renters SET move_in_date = COALESCE(move_in_date, $2) WHERE id = $1")
        .bind(renter_id)
        .bind(move_in)
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(())
}
