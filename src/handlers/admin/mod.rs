mod payments;

pub use payments::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::require_admin;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/payments", get(list_payments))
        .route("/admin/payments/approve", post(approve_payment))
        .route("/admin/payments/reject", post(reject_payment))
        .layer(middleware::from_fn_with_state(state, require_admin))
}
