mod access;
mod checkout;

pub use access::*;
pub use checkout::*;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::require_user;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/payments", post(start_checkout))
        .route("/courses/{course_id}/access", get(get_course_access))
        .layer(middleware::from_fn_with_state(state, require_user))
        .route("/health", get(health))
}
