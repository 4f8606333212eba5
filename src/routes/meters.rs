use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    schemas::{validate_input, ConsistencyQuery, MeterPath, RecordReadingInput, RoomPath},
    services::{
        meter_validation::{validate_meter_config_data, MeterConfigData},
        metering::{create_meter, record_reading, RecordReadingRequest},
        reading_consistency::check_reading_bill_consistency,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/meters/validate", axum::routing::post(validate_meter))
        .route("/rooms/{room_id}/meters", axum::routing::post(create))
        .route(
            "/meters/{meter_id}/readings",
            axum::routing::post(record),
        )
        .route(
            "/meter-readings/consistency",
            axum::routing::post(consistency),
        )
}

async fn validate_meter(Json(payload): Json<MeterConfigData>) -> Json<Value> {
    Json(json!({ "data": validate_meter_config_data(&payload) }))
}

async fn create(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    Json(payload): Json<MeterConfigData>,
) -> AppResult<impl IntoResponse> {
    let meter = create_meter(&state, path.room_id, payload).await?;
    Ok((StatusCode::CREATED, Json(meter)))
}

async fn record(
    State(state): State<AppState>,
    Path(path): Path<MeterPath>,
    Json(payload): Json<RecordReadingInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let request = RecordReadingRequest {
        current_reading: payload.current_reading,
        reading_date: payload.reading_date.unwrap_or_else(|| state.config.today()),
        unit_price: payload.unit_price,
        period: payload.period,
        confirm_abnormal: payload.confirm_abnormal,
        operator: payload.operator,
        remarks: payload.remarks,
    };
    let recorded = record_reading(&state, path.meter_id, request).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn consistency(
    State(state): State<AppState>,
    Query(query): Query<ConsistencyQuery>,
) -> AppResult<Json<Value>> {
    let report = check_reading_bill_consistency(state.db_pool()?, query.dry_run).await?;
    Ok(Json(json!({ "data": report })))
}
