//! Transactional email for payment outcomes.
//!
//! Sends through the Resend API when a key is configured; otherwise the
//! message is logged and skipped.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::dispatch::{DownstreamError, EmailReceipt, EmailSender, PaymentSnapshot};
use crate::models::RenderedInvoice;
use crate::util::format_money;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
/// Their sum stays under the best-effort timeout.
const RETRY_DELAYS: &[u64] = &[1, 2, 4];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Emails the payment flows send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailTemplate {
    PaymentConfirmation,
    PaymentFailed,
    BankTransferApproved,
    BankTransferRejected,
}

/// A template rendered into sendable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailAttachment {
    pub filename: String,
    /// URL the mail provider fetches the file from
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub template: EmailTemplate,
    pub data: Value,
    pub attachments: Vec<EmailAttachment>,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("")
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentConfirmation => "payment-confirmation",
            Self::PaymentFailed => "payment-failed",
            Self::BankTransferApproved => "bank-transfer-approved",
            Self::BankTransferRejected => "bank-transfer-rejected",
        }
    }

    /// Template data for a payment snapshot.
    pub fn data(&self, snapshot: &PaymentSnapshot, invoice: Option<&RenderedInvoice>) -> Value {
        let payment = &snapshot.payment;
        json!({
            "customerName": snapshot.customer.name,
            "courseTitle": snapshot.course.title,
            "amount": format_money(payment.amount, &payment.currency),
            "paymentId": payment.id,
            "paymentMethod": payment.method.label(),
            "invoiceNumber": invoice.map(|i| i.invoice_number.as_str()),
            "invoiceUrl": invoice.map(|i| i.public_path.as_str()),
            "reason": payment.failure_reason.as_deref().or(payment.admin_notes.as_deref()),
        })
    }

    pub fn render(&self, data: &Value) -> RenderedEmail {
        let name = field(data, "customerName");
        let course = field(data, "courseTitle");
        let amount = field(data, "amount");
        let payment_id = field(data, "paymentId");
        let reason = field(data, "reason");
        let invoice_number = field(data, "invoiceNumber");

        let (subject, lines): (String, Vec<String>) = match self {
            Self::PaymentConfirmation | Self::BankTransferApproved => {
                let heading = if *self == Self::BankTransferApproved {
                    "Your bank transfer has been approved"
                } else {
                    "Payment received"
                };
                let mut lines = vec![
                    format!("Hi {},", name),
                    format!("{}. You now have access to {}.", heading, course),
                    format!("Amount paid: {}", amount),
                    format!("Payment reference: {}", payment_id),
                ];
                if !invoice_number.is_empty() {
                    lines.push(format!("Invoice {} is attached.", invoice_number));
                }
                (format!("{}: {}", heading, course), lines)
            }
            Self::PaymentFailed | Self::BankTransferRejected => {
                let heading = if *self == Self::BankTransferRejected {
                    "Your bank transfer could not be approved"
                } else {
                    "Your payment did not go through"
                };
                let mut lines = vec![
                    format!("Hi {},", name),
                    format!("{} for {}.", heading, course),
                    format!("Payment reference: {}", payment_id),
                ];
                if !reason.is_empty() {
                    lines.push(format!("Reason: {}", reason));
                }
                lines.push("You have not been charged for access. You can try again at any time.".into());
                (format!("{}: {}", heading, course), lines)
            }
        };

        let text = lines.join("\n\n");
        let body: String = lines
            .iter()
            .map(|l| format!("<p>{}</p>", escape_html(l)))
            .collect::<Vec<_>>()
            .join("\n");
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">{}</h2>
{}
</body>
</html>"#,
            escape_html(&subject),
            body
        );

        RenderedEmail {
            subject,
            text,
            html,
        }
    }
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<EmailAttachment>,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

/// Email service using Resend API.
#[derive(Clone)]
pub struct EmailService {
    /// System-level Resend API key (from ENV)
    api_key: Option<String>,
    from_email: String,
    http_client: Client,
}

impl EmailService {
    pub fn new(api_key: Option<String>, from_email: String) -> Self {
        Self {
            api_key,
            from_email,
            http_client: Client::new(),
        }
    }

    /// Send a request to Resend API with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> Result<String, DownstreamError> {
        let mut last_error: Option<DownstreamError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    "Retrying email send after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(id) => {
                    if attempt > 0 {
                        tracing::info!(attempt, "Email sent successfully after retry");
                    }
                    return Ok(id);
                }
                Err((error, true)) => last_error = Some(error),
                Err((error, false)) => return Err(error),
            }
        }

        tracing::error!(
            attempts = RETRY_DELAYS.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error
            .unwrap_or_else(|| DownstreamError::Email("all retries exhausted".into())))
    }

    /// Send a single request to Resend API.
    ///
    /// Returns the message id, or `(error, is_transient)`.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> Result<String, (DownstreamError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                (DownstreamError::Email(e.to_string()), true)
            })?;

        let status = response.status();

        if status.is_success() {
            let result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                (DownstreamError::Email("unreadable provider response".into()), false)
            })?;
            return Ok(result.id);
        }

        let body = response.text().await.unwrap_or_default();
        let is_transient = status.as_u16() == 429 || status.is_server_error();

        if is_transient {
            tracing::warn!(status = %status, body = %body, "Resend API returned transient error");
        } else {
            tracing::error!(status = %status, body = %body, "Resend API returned non-transient error");
        }

        Err((
            DownstreamError::Email(format!("{} - {}", status, body)),
            is_transient,
        ))
    }
}

#[async_trait]
impl EmailSender for EmailService {
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DownstreamError> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(
                to = %message.to,
                template = message.template.name(),
                "No Resend API key configured, email not sent"
            );
            return Ok(EmailReceipt::default());
        };

        let rendered = message.template.render(&message.data);
        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![message.to.as_str()],
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
            attachments: message.attachments.clone(),
        };

        let id = self.send_request_with_retry(api_key, &request).await?;
        tracing::info!(
            to = %message.to,
            template = message.template.name(),
            message_id = %id,
            "Email sent via Resend"
        );
        Ok(EmailReceipt {
            message_id: Some(id),
        })
    }
}
