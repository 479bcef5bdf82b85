use serde::{Deserialize, Serialize};

/// Structured invoice payload handed to the invoice renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceData {
    pub invoice_number: String,
    pub payment_id: String,
    /// Date of issue, `YYYY-MM-DD`
    pub issued_on: String,
    pub customer: InvoiceCustomer,
    pub line_items: Vec<InvoiceLineItem>,
    pub subtotal: i64,
    pub total: i64,
    pub currency: String,
    /// Human-readable payment method label
    pub payment_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCustomer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_amount: i64,
    pub amount: i64,
}

/// What the renderer reports back once the document exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedInvoice {
    /// Publicly reachable path or URL of the document
    pub public_path: String,
    pub invoice_number: String,
    /// Location on the renderer's storage
    pub file_path: String,
}
