use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::{AppError, msg};
use crate::models::{Payment, PaymentMethod};
use crate::payments::{CardGatewayEvent, CompletedSession, FailedPaymentIntent};

use super::common::{ReconcileEvent, WebhookResult, lookup_payment_by_id, process_event};

/// Header carrying `t=<unix>,v1=<hex>`.
pub const SIGNATURE_HEADER: &str = "gateway-signature";

/// Signed card-gateway event stream.
///
/// The signature is checked against the raw body before it is parsed.
pub async fn handle_card_gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (status, message) = process_webhook(&state, &headers, &body);
    if status == StatusCode::OK {
        (status, axum::Json(json!({ "received": true }))).into_response()
    } else {
        (status, message).into_response()
    }
}

fn process_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> WebhookResult {
    let Some(client) = &state.card_gateway else {
        tracing::error!("Card gateway webhook received but gateway is not configured");
        return (StatusCode::SERVICE_UNAVAILABLE, msg::GATEWAY_NOT_CONFIGURED);
    };

    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Missing signature");
    };

    match client.verify_webhook_signature(body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, msg::INVALID_SIGNATURE),
        Err(e) => {
            tracing::warn!("Card gateway signature rejected: {}", e);
            return (StatusCode::BAD_REQUEST, msg::INVALID_SIGNATURE_FORMAT);
        }
    }

    let (event_id, event) = match CardGatewayEvent::parse(body) {
        Ok(parsed) => parsed,
        Err(AppError::Internal(e)) => {
            tracing::error!("Card gateway event could not be handled: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
        Err(e) => {
            tracing::warn!("Card gateway webhook payload rejected: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    let event = match event {
        CardGatewayEvent::SessionCompleted(session) => match session_completed(state, session) {
            Ok(event) => event,
            Err(result) => return result,
        },
        CardGatewayEvent::PaymentFailed(intent) => match payment_failed(state, intent) {
            Ok(event) => event,
            Err(result) => return result,
        },
        CardGatewayEvent::Ignored { event_type } => {
            tracing::debug!(
                event_id = event_id.as_deref().unwrap_or(""),
                event_type = %event_type,
                "Card gateway event ignored"
            );
            return (StatusCode::OK, "Event ignored");
        }
    };

    process_event(state, event)
}

fn session_completed(
    state: &AppState,
    session: CompletedSession,
) -> Result<ReconcileEvent, WebhookResult> {
    if session.payment_status != "paid" {
        tracing::info!(
            session_id = %session.id,
            payment_status = %session.payment_status,
            "Checkout session completed without payment, ignoring"
        );
        return Err((StatusCode::OK, "Session not paid"));
    }

    let by_reference = {
        let conn = state.db.get().map_err(|e| {
            tracing::error!("DB connection error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
        queries::get_payment_by_external_reference(&conn, PaymentMethod::CardGateway, &session.id)
    };

    let payment = match by_reference {
        Ok(Some(p)) => p,
        Ok(None) => {
            // The session id may not have been stored if checkout failed after creating it
            let Some(payment_id) = session.metadata.payment_id.as_deref() else {
                tracing::warn!(session_id = %session.id, "No payment found for completed session");
                return Err((StatusCode::OK, msg::PAYMENT_NOT_FOUND));
            };
            let payment = lookup_card_payment(state, payment_id)?;
            if payment
                .external_reference
                .as_deref()
                .is_some_and(|reference| reference != session.id)
            {
                tracing::error!(
                    payment_id = %payment.id,
                    session_id = %session.id,
                    "Completed session does not match the payment's recorded session"
                );
                return Err((StatusCode::OK, "Session mismatch"));
            }
            payment
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
        }
    };

    Ok(ReconcileEvent::Succeeded {
        payment,
        gateway_payment_id: session.payment_intent,
    })
}

fn payment_failed(
    state: &AppState,
    intent: FailedPaymentIntent,
) -> Result<ReconcileEvent, WebhookResult> {
    let by_intent = {
        let conn = state.db.get().map_err(|e| {
            tracing::error!("DB connection error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;
        queries::get_payment_by_gateway_payment_id(&conn, PaymentMethod::CardGateway, &intent.id)
    };

    let payment: Payment = match by_intent {
        Ok(Some(p)) => p,
        Ok(None) => {
            // Intent ids are only stored on completion; fall back to our own id in metadata
            let Some(payment_id) = intent.metadata.payment_id.as_deref() else {
                tracing::warn!(intent_id = %intent.id, "No payment found for failed payment intent");
                return Err((StatusCode::OK, msg::PAYMENT_NOT_FOUND));
            };
            lookup_card_payment(state, payment_id)?
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"));
        }
    };

    let reason = intent
        .last_payment_error
        .and_then(|e| e.message)
        .or_else(|| Some("Card payment failed".to_string()));

    Ok(ReconcileEvent::Failed { payment, reason })
}

/// Resolve a payment named in event metadata, refusing other payment methods.
fn lookup_card_payment(state: &AppState, payment_id: &str) -> Result<Payment, WebhookResult> {
    let payment = lookup_payment_by_id(state, payment_id)?;
    if payment.method != PaymentMethod::CardGateway {
        tracing::error!(
            payment_id = %payment.id,
            method = %payment.method,
            "Card gateway event for a payment made by another method"
        );
        return Err((StatusCode::OK, "Payment method mismatch"));
    }
    Ok(payment)
}
