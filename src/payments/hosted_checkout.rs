//! Regional hosted-checkout provider.
//!
//! The customer is sent to the provider's page with a signed form; the
//! provider later POSTs a server-to-server notification signed with
//! `UPPER(md5(merchant_id + order_id + amount + currency + status_code + UPPER(md5(secret))))`.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::config::HostedCheckoutConfig;
use crate::models::{Course, Payment, Profile};

const LIVE_CHECKOUT_URL: &str = "https://www.payhere.lk/pay/checkout";
const SANDBOX_CHECKOUT_URL: &str = "https://sandbox.payhere.lk/pay/checkout";

/// Provider status codes, mapped into our own lifecycle at the handler boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedCheckoutStatus {
    Success,
    Pending,
    Canceled,
    Failed,
    ChargedBack,
    Unknown(i32),
}

impl HostedCheckoutStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Self::Success,
            0 => Self::Pending,
            -1 => Self::Canceled,
            -2 => Self::Failed,
            -3 => Self::ChargedBack,
            other => Self::Unknown(other),
        }
    }

    /// Failure reason to record on the payment, if this code ends it unsuccessfully.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Self::Canceled => Some("Payment canceled by customer"),
            Self::Failed => Some("Payment failed at hosted checkout"),
            Self::ChargedBack => Some("Payment charged back"),
            _ => None,
        }
    }
}

/// Server-to-server notification body (form-encoded).
#[derive(Debug, Clone, Deserialize)]
pub struct HostedCheckoutNotification {
    pub merchant_id: String,
    /// Our payment id
    pub order_id: String,
    /// Provider's payment id
    pub payment_id: String,
    /// Decimal string as reported, e.g. "15000.00"
    pub amount: String,
    pub currency: String,
    pub status_code: String,
    pub signature: String,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// Signed form fields the browser posts to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct HostedCheckoutForm {
    pub merchant_id: String,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub order_id: String,
    pub items: String,
    pub currency: String,
    pub amount: String,
    pub first_name: String,
    pub email: String,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct HostedCheckoutClient {
    merchant_id: String,
    merchant_secret: String,
    sandbox: bool,
}

fn md5_upper_hex(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

/// Two-decimal amount as the provider expects it (15000 -> "15000.00").
pub fn format_amount(amount: i64) -> String {
    format!("{}.00", amount)
}

/// Parse a reported decimal amount back into whole major units.
///
/// Returns None for malformed, negative, or fractional amounts, none of
/// which can match a stored payment.
pub fn parse_major_amount(reported: &str) -> Option<i64> {
    let (whole, fraction) = match reported.trim().split_once('.') {
        Some((w, f)) => (w, f),
        None => (reported.trim(), ""),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !fraction.chars().all(|c| c == '0') {
        return None;
    }
    whole.parse().ok()
}

impl HostedCheckoutClient {
    pub fn new(config: &HostedCheckoutConfig) -> Self {
        Self {
            merchant_id: config.merchant_id.clone(),
            merchant_secret: config.merchant_secret.clone(),
            sandbox: config.sandbox,
        }
    }

    pub fn checkout_url(&self) -> &'static str {
        if self.sandbox {
            SANDBOX_CHECKOUT_URL
        } else {
            LIVE_CHECKOUT_URL
        }
    }

    fn secret_digest(&self) -> String {
        md5_upper_hex(&self.merchant_secret)
    }

    /// Hash placed on the outgoing checkout form.
    pub fn checkout_hash(&self, order_id: &str, amount: &str, currency: &str) -> String {
        md5_upper_hex(&format!(
            "{}{}{}{}{}",
            self.merchant_id,
            order_id,
            amount,
            currency,
            self.secret_digest()
        ))
    }

    /// Signature the provider must have sent for this notification.
    pub fn notification_signature(
        &self,
        order_id: &str,
        amount: &str,
        currency: &str,
        status_code: &str,
    ) -> String {
        md5_upper_hex(&format!(
            "{}{}{}{}{}{}",
            self.merchant_id,
            order_id,
            amount,
            currency,
            status_code,
            self.secret_digest()
        ))
    }

    /// Verify a notification's signature. Must pass before any field is trusted.
    pub fn verify_notification(&self, notification: &HostedCheckoutNotification) -> bool {
        if notification.merchant_id != self.merchant_id {
            tracing::warn!(
                merchant_id = %notification.merchant_id,
                "Hosted checkout notification for a different merchant"
            );
            return false;
        }

        let expected = self.notification_signature(
            &notification.order_id,
            &notification.amount,
            &notification.currency,
            &notification.status_code,
        );
        let provided = notification.signature.trim().to_ascii_uppercase();

        // Signature length is not secret (always 32 hex chars)
        if expected.len() != provided.len() {
            return false;
        }
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    /// Build the signed form for a pending payment.
    pub fn checkout_form(
        &self,
        payment: &Payment,
        course: &Course,
        customer: &Profile,
        return_url: &str,
        cancel_url: &str,
        notify_url: &str,
    ) -> HostedCheckoutForm {
        let amount = format_amount(payment.amount);
        HostedCheckoutForm {
            merchant_id: self.merchant_id.clone(),
            return_url: return_url.to_string(),
            cancel_url: cancel_url.to_string(),
            notify_url: notify_url.to_string(),
            order_id: payment.id.clone(),
            items: course.title.clone(),
            currency: payment.currency.clone(),
            hash: self.checkout_hash(&payment.id, &amount, &payment.currency),
            amount,
            first_name: customer.name.clone(),
            email: customer.email.clone(),
        }
    }
}
