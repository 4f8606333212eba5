use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    schemas::{SettingCategoryPath, SettingKeyPath, UpdateSettingInput, UpdateSettingsInput},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/settings",
            axum::routing::get(list_settings).put(update_settings),
        )
        .route("/settings/billing", axum::routing::get(billing_settings))
        .route("/settings/reset", axum::routing::post(reset_settings))
        .route(
            "/settings/category/{category}",
            axum::routing::get(settings_by_category),
        )
        .route(
            "/settings/{key}",
            axum::routing::get(get_setting).put(update_setting),
        )
}

async fn list_settings(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let settings = state.settings.get_all_settings().await?;
    Ok(Json(json!({ "data": settings })))
}

/// Never fails: falls back to the built-in prices when the store is down.
async fn billing_settings(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.settings.get_billing_settings().await }))
}

async fn settings_by_category(
    State(state): State<AppState>,
    Path(path): Path<SettingCategoryPath>,
) -> AppResult<Json<Value>> {
    let settings = state.settings.get_settings_by_category(&path.category).await?;
    Ok(Json(json!({ "data": settings })))
}

async fn get_setting(
    State(state): State<AppState>,
    Path(path): Path<SettingKeyPath>,
) -> AppResult<Json<Value>> {
    let setting = state.settings.get_setting(&path.key).await?;
    Ok(Json(json!({ "data": setting })))
}

async fn update_setting(
    State(state): State<AppState>,
    Path(path): Path<SettingKeyPath>,
    Json(payload): Json<UpdateSettingInput>,
) -> AppResult<Json<Value>> {
    let setting = state.settings.update_setting(&path.key, &payload.value).await?;
    Ok(Json(json!({ "data": setting })))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsInput>,
) -> AppResult<Json<Value>> {
    let settings = state.settings.update_settings(&payload.settings).await?;
    Ok(Json(json!({ "data": settings })))
}

async fn reset_settings(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let settings = state.settings.reset_to_defaults().await?;
    Ok(Json(json!({ "data": settings })))
}
