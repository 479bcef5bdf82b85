//! Invoice payload construction and the HTTP invoice renderer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;

use crate::dispatch::{DownstreamError, InvoiceRenderer, PaymentSnapshot};
use crate::id::EntityType;
use crate::models::{InvoiceCustomer, InvoiceData, InvoiceLineItem, Payment, RenderedInvoice};

/// Deterministic invoice number: `INV-{YYYYMMDD}-{first 8 hex of payment id}`.
///
/// Dated by completion, falling back to creation for payments not yet completed.
pub fn invoice_number(payment: &Payment) -> String {
    let ts = payment.completed_at.unwrap_or(payment.created_at);
    let date = DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".to_string());

    let prefix = format!("{}_", EntityType::Payment.prefix());
    let suffix: String = payment
        .id
        .strip_prefix(&prefix)
        .unwrap_or(&payment.id)
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect::<String>()
        .to_uppercase();

    format!("INV-{}-{}", date, suffix)
}

/// Build the renderer payload for a completed payment.
pub fn build_invoice_data(snapshot: &PaymentSnapshot) -> InvoiceData {
    let payment = &snapshot.payment;
    let issued_on = DateTime::from_timestamp(payment.completed_at.unwrap_or(payment.created_at), 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    InvoiceData {
        invoice_number: invoice_number(payment),
        payment_id: payment.id.clone(),
        issued_on,
        customer: InvoiceCustomer {
            name: snapshot.customer.name.clone(),
            email: snapshot.customer.email.clone(),
        },
        line_items: vec![InvoiceLineItem {
            description: snapshot.course.title.clone(),
            quantity: 1,
            unit_amount: payment.amount,
            amount: payment.amount,
        }],
        subtotal: payment.amount,
        total: payment.amount,
        currency: payment.currency.clone(),
        payment_method: payment.method.label().to_string(),
        notes: payment.admin_notes.clone(),
    }
}

/// Renderer service reached over HTTP: POST invoice JSON, receive document location.
#[derive(Clone)]
pub struct HttpInvoiceRenderer {
    client: Client,
    url: String,
}

impl HttpInvoiceRenderer {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DownstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownstreamError::Invoice(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl InvoiceRenderer for HttpInvoiceRenderer {
    async fn render(&self, invoice: &InvoiceData) -> Result<RenderedInvoice, DownstreamError> {
        let response = self
            .client
            .post(&self.url)
            .json(invoice)
            .send()
            .await
            .map_err(|e| DownstreamError::Invoice(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::Invoice(format!("{} - {}", status, body)));
        }

        response
            .json::<RenderedInvoice>()
            .await
            .map_err(|e| DownstreamError::Invoice(format!("unreadable renderer response: {}", e)))
    }
}
