use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::db::AppState;
use crate::error::msg;
use crate::extractors::Form;
use crate::models::PaymentMethod;
use crate::payments::{HostedCheckoutNotification, HostedCheckoutStatus, parse_major_amount};

use super::common::{ReconcileEvent, WebhookResult, lookup_payment_by_id, process_event};

/// Server-to-server notification from the hosted checkout.
///
/// Non-2xx only for unauthenticated or malformed notifications. Once the
/// signature checks out the provider gets 200, even if a follow-up fails.
pub async fn handle_hosted_checkout_notify(
    State(state): State<AppState>,
    Form(notification): Form<HostedCheckoutNotification>,
) -> impl IntoResponse {
    process_notification(&state, notification)
}

fn process_notification(state: &AppState, notification: HostedCheckoutNotification) -> WebhookResult {
    let Some(client) = &state.hosted_checkout else {
        tracing::error!("Hosted checkout notification received but provider is not configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            msg::HOSTED_CHECKOUT_NOT_CONFIGURED,
        );
    };

    if !client.verify_notification(&notification) {
        tracing::warn!(
            order_id = %notification.order_id,
            "Hosted checkout notification rejected: invalid signature"
        );
        return (StatusCode::BAD_REQUEST, msg::INVALID_SIGNATURE);
    }

    let Ok(code) = notification.status_code.trim().parse::<i32>() else {
        return (StatusCode::BAD_REQUEST, "Invalid status code");
    };
    let status = HostedCheckoutStatus::from_code(code);

    tracing::info!(
        order_id = %notification.order_id,
        provider_payment_id = %notification.payment_id,
        status = ?status,
        "Hosted checkout notification verified"
    );

    let event_kind = match status {
        HostedCheckoutStatus::Pending => return (StatusCode::OK, "Pending acknowledged"),
        HostedCheckoutStatus::Unknown(code) => {
            tracing::warn!(code, order_id = %notification.order_id, "Unknown hosted checkout status code");
            return (StatusCode::OK, "Status ignored");
        }
        other => other,
    };

    let payment = match lookup_payment_by_id(state, &notification.order_id) {
        Ok(p) => p,
        Err(result) => return result,
    };

    if payment.method != PaymentMethod::HostedCheckout {
        tracing::error!(
            payment_id = %payment.id,
            method = %payment.method,
            "Hosted checkout notification for a payment made by another method"
        );
        return (StatusCode::BAD_REQUEST, "Payment method mismatch");
    }

    let event = if event_kind == HostedCheckoutStatus::Success {
        if parse_major_amount(&notification.amount) != Some(payment.amount) {
            tracing::error!(
                payment_id = %payment.id,
                reported = %notification.amount,
                expected = payment.amount,
                "Hosted checkout amount mismatch"
            );
            return (StatusCode::BAD_REQUEST, msg::AMOUNT_MISMATCH);
        }
        if !notification.currency.eq_ignore_ascii_case(&payment.currency) {
            tracing::error!(
                payment_id = %payment.id,
                reported = %notification.currency,
                expected = %payment.currency,
                "Hosted checkout currency mismatch"
            );
            return (StatusCode::BAD_REQUEST, msg::CURRENCY_MISMATCH);
        }
        ReconcileEvent::Succeeded {
            payment,
            gateway_payment_id: Some(notification.payment_id),
        }
    } else {
        let reason = notification
            .status_message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| event_kind.failure_reason().map(String::from));
        ReconcileEvent::Failed { payment, reason }
    };

    process_event(state, event)
}
