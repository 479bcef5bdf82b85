pub mod card_gateway;
pub mod common;
pub mod hosted_checkout;

pub use card_gateway::handle_card_gateway_webhook;
pub use hosted_checkout::handle_hosted_checkout_notify;

use axum::{Router, routing::post};

use crate::db::AppState;

pub const HOSTED_CHECKOUT_NOTIFY_PATH: &str = "/webhooks/hosted-checkout";
pub const CARD_GATEWAY_WEBHOOK_PATH: &str = "/webhooks/card-gateway";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(HOSTED_CHECKOUT_NOTIFY_PATH, post(handle_hosted_checkout_notify))
        .route(CARD_GATEWAY_WEBHOOK_PATH, post(handle_card_gateway_webhook))
}
