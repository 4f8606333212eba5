use axum::{routing::get, Router};

use crate::state::AppState;

pub mod bills;
pub mod contracts;
pub mod health;
pub mod meters;
pub mod settings;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(contracts::router())
        .merge(bills::router())
        .merge(meters::router())
        .merge(settings::router())
}
