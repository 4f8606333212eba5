use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    schemas::{
        validate_input, CheckoutInput, ContractPath, CreateContractInput, RenewContractInput,
        SettlementPreviewInput,
    },
    services::contract_lifecycle::{
        checkout_contract, create_contract, get_renewal_defaults, preview_settlement,
        regenerate_contract_bills, renew_contract, CheckoutRequest, ContractTerms,
        CreateContractRequest, RenewContractRequest,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/contracts", axum::routing::post(create))
        .route(
            "/contracts/{contract_id}/bills",
            axum::routing::post(generate_bills),
        )
        .route(
            "/contracts/{contract_id}/renewal-defaults",
            axum::routing::get(renewal_defaults),
        )
        .route("/contracts/{contract_id}/renew", axum::routing::post(renew))
        .route(
            "/contracts/{contract_id}/settlement-preview",
            axum::routing::post(settlement_preview),
        )
        .route(
            "/contracts/{contract_id}/checkout",
            axum::routing::post(checkout),
        )
}

async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateContractInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;

    let request = CreateContractRequest {
        terms: ContractTerms {
            room_id: payload.room_id,
            renter_id: payload.renter_id,
            start_date: payload.start_date,
            end_date: payload.end_date,
            monthly_rent: payload.monthly_rent,
            deposit: payload.deposit,
            key_deposit: payload.key_deposit,
            cleaning_fee: payload.cleaning_fee,
            payment_method: payload.payment_method,
            payment_timing: payload.payment_timing,
            signed_by: payload.signed_by,
            signed_date: payload.signed_date,
            remarks: payload.remarks,
        },
        generate_bills: payload.generate_bills,
        meter_readings: payload.meter_readings,
        operator: payload.operator,
    };
    let created = create_contract(&state, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn generate_bills(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
) -> AppResult<Json<Value>> {
    let bills = regenerate_contract_bills(&state, path.contract_id).await?;
    Ok(Json(json!({ "data": bills })))
}

async fn renewal_defaults(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
) -> AppResult<Json<Value>> {
    let defaults = get_renewal_defaults(&state, path.contract_id).await?;
    Ok(Json(json!({ "data": defaults })))
}

async fn renew(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    Json(payload): Json<RenewContractInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;

    let request = RenewContractRequest {
        start_date: payload.start_date,
        end_date: payload.end_date,
        monthly_rent: payload.monthly_rent,
        deposit: payload.deposit,
        key_deposit: payload.key_deposit,
        cleaning_fee: payload.cleaning_fee,
        payment_method: payload.payment_method,
        payment_timing: payload.payment_timing,
        signed_by: payload.signed_by,
        signed_date: payload.signed_date,
        remarks: payload.remarks,
        generate_bills: payload.generate_bills,
        operator: payload.operator,
    };
    let created = renew_contract(&state, path.contract_id, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn settlement_preview(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    Json(payload): Json<SettlementPreviewInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let preview = preview_settlement(
        &state,
        path.contract_id,
        payload.checkout_date,
        payload.damage_assessment,
        payload.paid_rent,
        &payload.overrides,
    )
    .await?;
    Ok(Json(json!({ "data": preview })))
}

async fn checkout(
    State(state): State<AppState>,
    Path(path): Path<ContractPath>,
    Json(payload): Json<CheckoutInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;

    let request = CheckoutRequest {
        checkout_date: payload.checkout_date,
        checkout_reason: payload.checkout_reason,
        damage_assessment: payload.damage_assessment,
        final_meter_readings: payload.final_meter_readings,
        remarks: payload.remarks,
        operator: payload.operator,
    };
    let outcome = checkout_contract(&state, path.contract_id, request).await?;
    Ok(Json(json!({ "data": outcome })))
}
