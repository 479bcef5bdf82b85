//! Provider-agnostic webhook processing.
//!
//! Each provider handler authenticates its request, resolves the payment and
//! maps its own status vocabulary into a [`ReconcileEvent`]. Everything after
//! that is shared.

use axum::http::StatusCode;

use crate::db::{AppState, queries};
use crate::email::EmailTemplate;
use crate::error::{AppError, msg};
use crate::models::{FailureStatus, Payment, TransitionDetails};
use crate::reconcile;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// What a verified notification asks us to do with a payment.
#[derive(Debug)]
pub enum ReconcileEvent {
    Succeeded {
        payment: Payment,
        gateway_payment_id: Option<String>,
    },
    Failed {
        payment: Payment,
        reason: Option<String>,
    },
}

/// Helper to unwrap DB query results with consistent error handling.
///
/// Not-found is acknowledged with 200: the provider cannot fix it by retrying.
pub fn db_lookup<T>(
    result: Result<Option<T>, AppError>,
    not_found_msg: &'static str,
) -> Result<T, WebhookResult> {
    match result {
        Ok(Some(v)) => Ok(v),
        Ok(None) => {
            tracing::warn!("{}", not_found_msg);
            Err((StatusCode::OK, not_found_msg))
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

/// Map a reconciliation error to the provider response.
///
/// A conflicting transition is logged and acknowledged: redelivering the same
/// event can never make it valid.
fn reconcile_error(payment_id: &str, e: AppError) -> WebhookResult {
    match e {
        AppError::Validation(detail) => {
            tracing::error!(
                payment_id = %payment_id,
                detail = %detail,
                "Conflicting payment transition ignored"
            );
            (StatusCode::OK, "Conflicting transition ignored")
        }
        AppError::NotFound(_) => {
            tracing::warn!(payment_id = %payment_id, "Payment disappeared during reconciliation");
            (StatusCode::OK, msg::PAYMENT_NOT_FOUND)
        }
        other => {
            tracing::error!(payment_id = %payment_id, error = %other, "Reconciliation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Apply a verified event to the store and schedule follow-ups.
pub fn process_event(state: &AppState, event: ReconcileEvent) -> WebhookResult {
    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match event {
        ReconcileEvent::Succeeded {
            payment,
            gateway_payment_id,
        } => {
            let details = TransitionDetails {
                gateway_payment_id: gateway_payment_id.as_deref(),
                ..Default::default()
            };
            match reconcile::complete_and_grant(&mut conn, &payment.id, &details) {
                Ok(completion) if completion.applied => {
                    drop(conn);
                    reconcile::spawn_confirmation(state, completion.payment);
                    (StatusCode::OK, "OK")
                }
                Ok(_) => (StatusCode::OK, "Already processed"),
                Err(e) => reconcile_error(&payment.id, e),
            }
        }
        ReconcileEvent::Failed { payment, reason } => {
            match reconcile::fail_payment(
                &conn,
                &payment.id,
                FailureStatus::Failed,
                reason.as_deref(),
                &TransitionDetails::default(),
            ) {
                Ok(transition) if transition.was_applied() => {
                    drop(conn);
                    reconcile::spawn_failure_notice(
                        state,
                        transition.into_payment(),
                        EmailTemplate::PaymentFailed,
                    );
                    (StatusCode::OK, "OK")
                }
                Ok(_) => (StatusCode::OK, "Already processed"),
                Err(e) => reconcile_error(&payment.id, e),
            }
        }
    }
}

/// Resolve a payment by id, tolerating garbage ids without touching the store.
pub fn lookup_payment_by_id(state: &AppState, payment_id: &str) -> Result<Payment, WebhookResult> {
    if !crate::id::is_valid_prefixed_id(payment_id) {
        tracing::warn!(order_id = %payment_id, "Notification for malformed payment id");
        return Err((StatusCode::OK, msg::PAYMENT_NOT_FOUND));
    }

    let conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    db_lookup(
        queries::get_payment_by_id(&conn, payment_id),
        msg::PAYMENT_NOT_FOUND,
    )
}
