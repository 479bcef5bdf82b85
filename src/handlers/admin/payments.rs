use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::email::EmailTemplate;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Query};
use crate::middleware::AuthContext;
use crate::models::{
    FailureStatus, Payment, PaymentFilters, PaymentMethod, PaymentProjection, PaymentStatus,
    TransitionDetails,
};
use crate::reconcile;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovePaymentRequest {
    pub payment_id: String,
    pub admin_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectPaymentRequest {
    pub payment_id: String,
    pub admin_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceReference {
    pub invoice_number: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub payment: PaymentProjection,
    pub invoice: Option<InvoiceReference>,
}

/// The body's adminId must name the caller; an admin cannot act on behalf of another.
fn check_acting_admin(ctx: &AuthContext, admin_id: &str) -> Result<()> {
    if ctx.profile.id != admin_id {
        tracing::warn!(
            profile_id = %ctx.profile.id,
            claimed_admin_id = %admin_id,
            "Admin id in request does not match caller"
        );
        return Err(AppError::Forbidden(msg::ADMIN_ID_MISMATCH.into()));
    }
    Ok(())
}

/// Only pending bank transfers can be reviewed.
fn check_reviewable(payment: &Payment) -> Result<()> {
    if payment.method != PaymentMethod::BankTransfer {
        return Err(AppError::Validation(msg::NOT_BANK_TRANSFER.into()));
    }
    if payment.status != PaymentStatus::Pending {
        return Err(AppError::Validation(format!(
            "Payment {} is already {}",
            payment.id, payment.status
        )));
    }
    Ok(())
}

/// Approve a bank transfer: complete the payment, grant access, issue the invoice.
///
/// The invoice is awaited (bounded) so its reference can be returned; the
/// email goes out in the background. Neither can fail the approval.
pub async fn approve_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<ApprovePaymentRequest>,
) -> Result<Json<ReviewResponse>> {
    check_acting_admin(&ctx, &request.admin_id)?;

    let snapshot = {
        let mut conn = state.db.get()?;

        let payment = queries::get_payment_by_id(&conn, &request.payment_id)?
            .or_not_found(msg::PAYMENT_NOT_FOUND)?;
        check_reviewable(&payment)?;

        let details = TransitionDetails {
            reviewed_by: Some(&ctx.profile.id),
            notes: request.notes.as_deref(),
            ..Default::default()
        };
        let completion = reconcile::complete_and_grant(&mut conn, &payment.id, &details)?;
        if !completion.applied {
            // Lost a race with another approval of the same payment
            return Err(AppError::Validation(format!(
                "Payment {} is already {}",
                completion.payment.id, completion.payment.status
            )));
        }

        tracing::info!(
            payment_id = %completion.payment.id,
            admin_id = %ctx.profile.id,
            "Bank transfer approved"
        );

        reconcile::load_snapshot(&conn, completion.payment)?
    };

    let invoice = state.dispatcher.issue_invoice(&snapshot).await;

    let mut payment = snapshot.payment.clone();
    if let Some(invoice) = &invoice {
        reconcile::record_invoice(&state.db, &payment.id, invoice);
        payment.invoice_number = Some(invoice.invoice_number.clone());
        payment.invoice_url = Some(invoice.public_path.clone());
    }

    let dispatcher = state.dispatcher.clone();
    let email_invoice = invoice.clone();
    state
        .dispatcher
        .spawn("bank_transfer_approved", payment.id.clone(), async move {
            dispatcher
                .notify(
                    EmailTemplate::BankTransferApproved,
                    &snapshot,
                    email_invoice.as_ref(),
                )
                .await;
        });

    Ok(Json(ReviewResponse {
        payment: PaymentProjection::from(&payment),
        invoice: invoice.map(|inv| InvoiceReference {
            invoice_number: inv.invoice_number,
            url: inv.public_path,
        }),
    }))
}

/// Reject a bank transfer. No access is granted and no invoice is issued.
pub async fn reject_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<RejectPaymentRequest>,
) -> Result<Json<ReviewResponse>> {
    check_acting_admin(&ctx, &request.admin_id)?;

    let payment = {
        let conn = state.db.get()?;

        let payment = queries::get_payment_by_id(&conn, &request.payment_id)?
            .or_not_found(msg::PAYMENT_NOT_FOUND)?;
        check_reviewable(&payment)?;

        let reason = request.reason.as_deref().filter(|r| !r.trim().is_empty());
        let details = TransitionDetails {
            reviewed_by: Some(&ctx.profile.id),
            notes: reason,
            ..Default::default()
        };
        let transition = reconcile::fail_payment(
            &conn,
            &payment.id,
            FailureStatus::Rejected,
            reason,
            &details,
        )?;
        if !transition.was_applied() {
            let current = transition.payment();
            return Err(AppError::Validation(format!(
                "Payment {} is already {}",
                current.id, current.status
            )));
        }

        tracing::info!(
            payment_id = %payment.id,
            admin_id = %ctx.profile.id,
            "Bank transfer rejected"
        );

        transition.into_payment()
    };

    reconcile::spawn_failure_notice(&state, payment.clone(), EmailTemplate::BankTransferRejected);

    Ok(Json(ReviewResponse {
        payment: PaymentProjection::from(&payment),
        invoice: None,
    }))
}

/// Payments for the admin dashboard, newest first.
pub async fn list_payments(
    State(state): State<AppState>,
    Query(filters): Query<PaymentFilters>,
) -> Result<Json<Vec<PaymentProjection>>> {
    let conn = state.db.get()?;
    let payments = queries::list_payments(&conn, &filters)?;
    Ok(Json(payments.iter().map(PaymentProjection::from).collect()))
}
