pub mod admin;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Every route, with state applied. Callers add their own outer layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Bearer-authenticated user endpoints plus /health
        .merge(public::router(state.clone()))
        // Provider-authenticated callbacks
        .merge(webhooks::router())
        // Admin review of bank transfers
        .merge(admin::router(state.clone()))
        .with_state(state)
}
