//! Shared reconciliation core.
//!
//! All three entry points (hosted-checkout notify, card-gateway webhook,
//! admin review) go through these functions. The payment row's
//! `WHERE status = 'pending'` update is the only serialization point and the
//! `purchases` uniqueness constraint is the only grant guard.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::{AppState, DbPool, queries};
use crate::db::queries::Transition;
use crate::dispatch::PaymentSnapshot;
use crate::email::EmailTemplate;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{FailureStatus, Payment, RenderedInvoice, TransitionDetails};

/// Result of [`complete_and_grant`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub payment: Payment,
    /// This call moved the payment out of `pending`. Follow-ups run only when true.
    pub applied: bool,
    /// This call created the access grant row.
    pub newly_granted: bool,
}

/// Complete a payment and grant course access in one transaction.
///
/// Redelivery of an already-completed payment re-runs the grant (a no-op
/// when the row exists) and reports `applied = false`. A payment in a failure
/// terminal is a `Validation` error and nothing is written.
pub fn complete_and_grant(
    conn: &mut Connection,
    payment_id: &str,
    details: &TransitionDetails<'_>,
) -> Result<Completion> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let transition = queries::try_complete_payment(&tx, payment_id, details)?;
    let payment = transition.payment();
    let newly_granted =
        queries::grant_course_access(&tx, &payment.user_id, &payment.course_id, &payment.id)?;

    tx.commit()?;

    let applied = transition.was_applied();
    let payment = transition.into_payment();

    if applied {
        tracing::info!(
            payment_id = %payment.id,
            user_id = %payment.user_id,
            course_id = %payment.course_id,
            method = %payment.method,
            "Payment completed and course access granted"
        );
    } else {
        tracing::info!(
            payment_id = %payment.id,
            newly_granted,
            "Payment already completed, redelivery ignored"
        );
    }

    Ok(Completion {
        payment,
        applied,
        newly_granted,
    })
}

/// Move a pending payment to a failure terminal.
pub fn fail_payment(
    conn: &Connection,
    payment_id: &str,
    status: FailureStatus,
    reason: Option<&str>,
    details: &TransitionDetails<'_>,
) -> Result<Transition> {
    let transition = queries::try_fail_payment(conn, payment_id, status, reason, details)?;

    if transition.was_applied() {
        tracing::info!(
            payment_id = %payment_id,
            status = %transition.payment().status,
            reason = reason.unwrap_or(""),
            "Payment marked as unsuccessful"
        );
    }

    Ok(transition)
}

/// Load the customer and course for a payment.
pub fn load_snapshot(conn: &Connection, payment: Payment) -> Result<PaymentSnapshot> {
    let customer = queries::get_profile(conn, &payment.user_id)?
        .or_not_found(msg::PROFILE_NOT_FOUND)?;
    let course = queries::get_course(conn, &payment.course_id)?
        .or_not_found(msg::COURSE_NOT_FOUND)?;

    Ok(PaymentSnapshot {
        payment,
        customer,
        course,
    })
}

/// Persist the rendered invoice on the payment. Failure is logged, never raised.
pub fn record_invoice(db: &DbPool, payment_id: &str, invoice: &RenderedInvoice) {
    let result = db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| {
            queries::set_payment_invoice(
                &conn,
                payment_id,
                &invoice.invoice_number,
                &invoice.public_path,
            )
        });

    if let Err(e) = result {
        tracing::warn!(
            payment_id = %payment_id,
            invoice_number = %invoice.invoice_number,
            error = %e,
            "Failed to store invoice reference"
        );
    }
}

/// Load the snapshot for a just-transitioned payment. On failure the
/// follow-ups are skipped; the transition itself is already committed.
fn snapshot_for_followup(state: &AppState, payment: Payment) -> Option<PaymentSnapshot> {
    let payment_id = payment.id.clone();
    let result = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| load_snapshot(&conn, payment));

    match result {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(
                payment_id = %payment_id,
                error = %e,
                "Could not load payment details, skipping notifications"
            );
            None
        }
    }
}

/// Invoice plus confirmation email for a provider-confirmed payment, in the background.
pub fn spawn_confirmation(state: &AppState, payment: Payment) {
    let Some(snapshot) = snapshot_for_followup(state, payment) else {
        return;
    };
    let db = state.db.clone();
    let dispatcher = state.dispatcher.clone();

    state.dispatcher.spawn(
        "payment_confirmed",
        snapshot.payment.id.clone(),
        async move {
            let invoice = dispatcher.issue_invoice(&snapshot).await;
            if let Some(invoice) = &invoice {
                record_invoice(&db, &snapshot.payment.id, invoice);
            }
            dispatcher
                .notify(EmailTemplate::PaymentConfirmation, &snapshot, invoice.as_ref())
                .await;
        },
    );
}

/// Email for an unsuccessful payment, in the background.
pub fn spawn_failure_notice(state: &AppState, payment: Payment, template: EmailTemplate) {
    let Some(snapshot) = snapshot_for_followup(state, payment) else {
        return;
    };
    let dispatcher = state.dispatcher.clone();

    state
        .dispatcher
        .spawn(template.name(), snapshot.payment.id.clone(), async move {
            dispatcher.notify(template, &snapshot, None).await;
        });
}
