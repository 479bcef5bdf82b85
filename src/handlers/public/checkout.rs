use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::Json;
use crate::handlers::webhooks::HOSTED_CHECKOUT_NOTIFY_PATH;
use crate::middleware::AuthContext;
use crate::models::{
    CreatePayment, FailureStatus, PaymentMethod, PaymentProjection, TransitionDetails,
};
use crate::payments::{HostedCheckoutForm, minor_unit_amount};
use crate::reconcile;

/// The client picks the course and the method. Price and currency come from the course.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutRequest {
    pub course_id: String,
    pub method: PaymentMethod,
}

/// What the client does next to pay.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutInstructions {
    /// Auto-submit `fields` as a form POST to `action_url`.
    HostedCheckout {
        action_url: &'static str,
        fields: HostedCheckoutForm,
    },
    /// Redirect to the gateway-hosted session.
    CardGateway { session_id: String, url: String },
    /// Pay by transfer and wait for an admin to review it.
    BankTransfer,
}

#[derive(Debug, Serialize)]
pub struct StartCheckoutResponse {
    pub payment: PaymentProjection,
    pub checkout: CheckoutInstructions,
}

pub async fn start_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<Json<StartCheckoutResponse>> {
    // Refuse before creating anything if the provider is missing
    match request.method {
        PaymentMethod::HostedCheckout if state.hosted_checkout.is_none() => {
            return Err(AppError::BadRequest(msg::HOSTED_CHECKOUT_NOT_CONFIGURED.into()));
        }
        PaymentMethod::CardGateway if state.card_gateway.is_none() => {
            return Err(AppError::BadRequest(msg::GATEWAY_NOT_CONFIGURED.into()));
        }
        _ => {}
    }

    let (course, payment) = {
        let conn = state.db.get()?;

        let course = queries::get_course(&conn, &request.course_id)?
            .or_not_found(msg::COURSE_NOT_FOUND)?;

        if queries::get_access_grant(&conn, &ctx.profile.id, &course.id)?.is_some() {
            return Err(AppError::Validation(msg::ALREADY_HAS_ACCESS.into()));
        }

        if request.method == PaymentMethod::CardGateway {
            minor_unit_amount(course.price, &course.currency)?;
        }

        let payment = queries::create_payment(
            &conn,
            &CreatePayment {
                user_id: ctx.profile.id.clone(),
                course_id: course.id.clone(),
                amount: course.price,
                currency: course.currency.clone(),
                method: request.method,
            },
        )?;
        (course, payment)
    };

    tracing::info!(
        payment_id = %payment.id,
        user_id = %payment.user_id,
        course_id = %payment.course_id,
        method = %payment.method,
        "Checkout started"
    );

    let checkout = match (request.method, &state.hosted_checkout, &state.card_gateway) {
        (PaymentMethod::HostedCheckout, Some(client), _) => {
            let notify_url = format!(
                "{}{}",
                state.base_url.trim_end_matches('/'),
                HOSTED_CHECKOUT_NOTIFY_PATH
            );
            CheckoutInstructions::HostedCheckout {
                action_url: client.checkout_url(),
                fields: client.checkout_form(
                    &payment,
                    &course,
                    &ctx.profile,
                    &state.checkout_success_url,
                    &state.checkout_cancel_url,
                    &notify_url,
                ),
            }
        }
        (PaymentMethod::CardGateway, _, Some(client)) => {
            let session = match client
                .create_checkout_session(
                    &payment,
                    &course,
                    &ctx.profile.email,
                    &state.checkout_success_url,
                    &state.checkout_cancel_url,
                )
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %e,
                        "Failed to create card gateway checkout session"
                    );
                    let conn = state.db.get()?;
                    reconcile::fail_payment(
                        &conn,
                        &payment.id,
                        FailureStatus::Failed,
                        Some("Checkout session could not be created"),
                        &TransitionDetails::default(),
                    )?;
                    return Err(AppError::Internal(format!(
                        "Checkout session creation failed for {}",
                        payment.id
                    )));
                }
            };

            let conn = state.db.get()?;
            queries::set_payment_external_reference(&conn, &payment.id, &session.id)?;

            CheckoutInstructions::CardGateway {
                session_id: session.id,
                url: session.url,
            }
        }
        (PaymentMethod::BankTransfer, _, _) => CheckoutInstructions::BankTransfer,
        // Both provider arms were checked for configuration above
        _ => return Err(AppError::Internal("Payment provider disappeared".into())),
    };

    Ok(Json(StartCheckoutResponse {
        payment: PaymentProjection::from(&payment),
        checkout,
    }))
}
