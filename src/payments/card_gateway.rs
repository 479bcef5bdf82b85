use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::CardGatewayConfig;
use crate::error::{AppError, Result, msg};
use crate::models::{Course, Payment};

type HmacSha256 = Hmac<Sha256>;

const CHECKOUT_SESSIONS_URL: &str = "https://api.stripe.com/v1/checkout/sessions";

/// Currencies the gateway takes in whole units.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Convert a major-unit price into the gateway's smallest currency unit.
pub fn minor_unit_amount(amount: i64, currency: &str) -> Result<i64> {
    let factor = if ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(currency))
    {
        1
    } else {
        100
    };
    amount.checked_mul(factor).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Amount {} {} exceeds what the card gateway accepts",
            amount, currency
        ))
    })
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

/// Hosted session the customer is redirected to.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CardGatewayClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl CardGatewayClient {
    /// All outbound calls are bounded by `timeout`.
    pub fn new(config: &CardGatewayConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    /// Create a checkout session for a pending payment.
    ///
    /// The payment id travels in both session and payment-intent metadata so a
    /// failure event can be matched even before the intent id is stored.
    pub async fn create_checkout_session(
        &self,
        payment: &Payment,
        course: &Course,
        customer_email: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession> {
        let unit_amount = minor_unit_amount(payment.amount, &payment.currency)?.to_string();
        let currency = payment.currency.to_lowercase();

        let response = self
            .client
            .post(CHECKOUT_SESSIONS_URL)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", success_url),
                ("cancel_url", cancel_url),
                ("customer_email", customer_email),
                ("client_reference_id", payment.id.as_str()),
                ("line_items[0][quantity]", "1"),
                ("line_items[0][price_data][currency]", currency.as_str()),
                ("line_items[0][price_data][unit_amount]", unit_amount.as_str()),
                ("line_items[0][price_data][product_data][name]", course.title.as_str()),
                ("metadata[payment_id]", payment.id.as_str()),
                ("payment_intent_data[metadata][payment_id]", payment.id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Card gateway API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Card gateway API error: {}",
                error_text
            )));
        }

        let session: CreateCheckoutSessionResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("Failed to parse card gateway response: {}", e))
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    /// Verify a `t=<unix>,v1=<hex>` signature header over the exact raw body.
    ///
    /// Returns `Err(BadRequest)` for a malformed header and `Ok(false)` for a
    /// well-formed header that does not match.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Card gateway webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!(
                "Card gateway webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        // Signature length is not secret (always 64 hex chars for SHA-256)
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

// ============ Webhook events ============

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayMetadata {
    #[serde(default)]
    pub payment_id: Option<String>,
}

/// `checkout.session.completed`
#[derive(Debug, Deserialize)]
pub struct CompletedSession {
    pub id: String,
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: GatewayMetadata,
}

#[derive(Debug, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

/// `payment_intent.payment_failed`
#[derive(Debug, Deserialize)]
pub struct FailedPaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: GatewayMetadata,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

/// Card-gateway events this service acts on.
#[derive(Debug)]
pub enum CardGatewayEvent {
    SessionCompleted(CompletedSession),
    PaymentFailed(FailedPaymentIntent),
    /// Any other event type. Acknowledged without action.
    Ignored { event_type: String },
}

impl CardGatewayEvent {
    /// Parse a verified webhook body.
    ///
    /// An unreadable envelope is `BadRequest`. A recognized event type whose
    /// object does not deserialize is `Internal`, so the gateway redelivers it.
    pub fn parse(body: &[u8]) -> Result<(Option<String>, Self)> {
        let envelope: EventEnvelope = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid event envelope: {}", e)))?;

        let event = match envelope.event_type.as_str() {
            "checkout.session.completed" => {
                CardGatewayEvent::SessionCompleted(event_object(&envelope)?)
            }
            "payment_intent.payment_failed" => {
                CardGatewayEvent::PaymentFailed(event_object(&envelope)?)
            }
            _ => CardGatewayEvent::Ignored {
                event_type: envelope.event_type,
            },
        };

        Ok((envelope.id, event))
    }
}

fn event_object<T: serde::de::DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    T::deserialize(&envelope.data.object).map_err(|e| {
        AppError::Internal(format!(
            "Malformed {} object: {}",
            envelope.event_type, e
        ))
    })
}
