use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::BillStatus,
    repository::{bills as bills_repo, map_db_error},
    schemas::{
        validate_input, BillPath, GenerateUtilityBillsInput, RentPreviewInput,
        UtilityPreviewInput,
    },
    services::{
        bill_aggregation::{generate_utility_bills, AggregationStrategy, UtilityBillingOptions},
        bill_calculation::{
            calculate_rent_bill, calculate_utility_bill, calculate_utility_bill_cached,
            get_reminder_status, RentBillOptions,
        },
        settings::SettingsSnapshot,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/bills/utilities", axum::routing::post(generate_utilities))
        .route(
            "/bills/calculate/utilities",
            axum::routing::post(preview_utilities),
        )
        .route("/bills/calculate/rent", axum::routing::post(preview_rent))
        .route("/bills/{bill_id}/reminder", axum::routing::get(reminder))
}

async fn generate_utilities(
    State(state): State<AppState>,
    Json(payload): Json<GenerateUtilityBillsInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let requested = payload
        .aggregation_mode
        .as_deref()
        .filter(|mode| !mode.trim().is_empty())
        .map(str::parse::<AggregationStrategy>)
        .transpose()?;
    let options = UtilityBillingOptions {
        due_days: payload.due_days.unwrap_or(state.config.bill_due_days),
        operator: payload.operator,
    };

    let run = generate_utility_bills(state.db_pool()?, &payload.reading_ids, requested, &options)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": run }))))
}

async fn preview_utilities(
    State(state): State<AppState>,
    Json(payload): Json<UtilityPreviewInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let result = match &payload.settings_snapshot {
        Some(cached) => calculate_utility_bill_cached(
            &SettingsSnapshot::from_pairs(
                cached.iter().map(|(key, value)| (key.as_str(), value.as_str())),
            ),
            payload.electricity_usage,
            payload.water_usage,
            payload.gas_usage,
            Some(&payload.prices),
        ),
        None => {
            calculate_utility_bill(
                &state.settings,
                payload.electricity_usage,
                payload.water_usage,
                payload.gas_usage,
                Some(&payload.prices),
            )
            .await
        }
    };
    Ok(Json(json!({ "data": result })))
}

async fn preview_rent(Json(payload): Json<RentPreviewInput>) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let result = calculate_rent_bill(
        payload.monthly_rent,
        &payload.payment_cycle,
        RentBillOptions {
            deposit_months: payload.deposit_months,
            key_deposit: payload.key_deposit,
            cleaning_fee: payload.cleaning_fee,
        },
    );
    Ok(Json(json!({ "data": result })))
}

async fn reminder(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    let bill = bills_repo::get_bill(&mut conn, path.bill_id)
        .await?
        .ok_or_else(|| AppError::NotFound("账单不存在".to_string()))?;
    drop(conn);

    if !matches!(bill.status, BillStatus::Pending | BillStatus::Overdue) {
        return Ok(Json(json!({
            "data": {
                "bill_id": bill.id,
                "should_remind": false,
                "status": bill.status,
            }
        })));
    }

    let settings = state.settings.get_billing_settings().await;
    let status = get_reminder_status(bill.due_date, state.config.today(), settings.reminder_days);
    Ok(Json(json!({
        "data": {
            "bill_id": bill.id,
            "bill_number": bill.bill_number,
            "pending_amount": bill.pending_amount,
            "reminder": status,
        }
    })))
}
