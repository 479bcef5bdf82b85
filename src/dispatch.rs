//! Invoice and notification dispatch.
//!
//! Everything here runs after the payment transition and access grant have
//! committed. Failures are logged and recorded in a [`FailureLog`], never
//! returned to the reconciliation caller.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio_util::task::TaskTracker;

use crate::email::{EmailAttachment, EmailMessage, EmailTemplate};
use crate::invoice::build_invoice_data;
use crate::models::{Course, InvoiceData, Payment, Profile, RenderedInvoice};

/// Most recent failures kept for inspection.
const FAILURE_LOG_CAPACITY: usize = 256;

/// Failure of an email or invoice collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownstreamError {
    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("invoice rendering failed: {0}")]
    Invoice(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
}

/// Delivery receipt from the email collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailReceipt {
    /// None when delivery is disabled and the message was only logged
    pub message_id: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DownstreamError>;
}

#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, invoice: &InvoiceData) -> Result<RenderedInvoice, DownstreamError>;
}

/// Payment plus the read-only records the dispatcher needs.
#[derive(Debug, Clone)]
pub struct PaymentSnapshot {
    pub payment: Payment,
    pub customer: Profile,
    pub course: Course,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownstreamFailure {
    pub operation: &'static str,
    pub payment_id: String,
    pub error: String,
    pub failed_at: i64,
}

/// Bounded in-memory sink of swallowed downstream failures.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    entries: Arc<Mutex<VecDeque<DownstreamFailure>>>,
}

impl FailureLog {
    pub fn record(&self, operation: &'static str, payment_id: &str, error: &DownstreamError) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == FAILURE_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(DownstreamFailure {
            operation,
            payment_id: payment_id.to_string(),
            error: error.to_string(),
            failed_at: chrono::Utc::now().timestamp(),
        });
    }

    pub fn snapshot(&self) -> Vec<DownstreamFailure> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fire-and-log wrapper: bounds a downstream call with a timeout and turns
/// any failure into a log line plus a [`FailureLog`] entry.
#[derive(Debug, Clone)]
pub struct BestEffort {
    timeout: Duration,
    failures: FailureLog,
}

impl BestEffort {
    pub fn new(timeout: Duration, failures: FailureLog) -> Self {
        Self { timeout, failures }
    }

    pub async fn run<T, F>(&self, operation: &'static str, payment_id: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, DownstreamError>>,
    {
        let error = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => DownstreamError::Timeout {
                operation,
                seconds: self.timeout.as_secs(),
            },
        };

        tracing::warn!(
            payment_id = %payment_id,
            operation,
            error = %error,
            "Best-effort dispatch failed, payment state is unaffected"
        );
        self.failures.record(operation, payment_id, &error);
        None
    }
}

/// Hands completed payments to the invoice renderer and email sender.
///
/// Constructed once at start-up and shared through `AppState`.
#[derive(Clone)]
pub struct Dispatcher {
    email: Arc<dyn EmailSender>,
    invoices: Option<Arc<dyn InvoiceRenderer>>,
    best_effort: BestEffort,
    failures: FailureLog,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        email: Arc<dyn EmailSender>,
        invoices: Option<Arc<dyn InvoiceRenderer>>,
        timeout: Duration,
    ) -> Self {
        let failures = FailureLog::default();
        Self {
            email,
            invoices,
            best_effort: BestEffort::new(timeout, failures.clone()),
            failures,
            tasks: TaskTracker::new(),
        }
    }

    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Render the invoice for a completed payment. None if rendering is
    /// disabled, failed, or timed out.
    pub async fn issue_invoice(&self, snapshot: &PaymentSnapshot) -> Option<RenderedInvoice> {
        let Some(renderer) = &self.invoices else {
            tracing::debug!(
                payment_id = %snapshot.payment.id,
                "Invoice renderer not configured, skipping invoice"
            );
            return None;
        };

        let data = build_invoice_data(snapshot);
        let rendered = self
            .best_effort
            .run("issue_invoice", &snapshot.payment.id, renderer.render(&data))
            .await?;

        tracing::info!(
            payment_id = %snapshot.payment.id,
            invoice_number = %rendered.invoice_number,
            "Invoice issued"
        );
        Some(rendered)
    }

    /// Send one templated email to the paying customer. Returns whether it was handed off.
    pub async fn notify(
        &self,
        template: EmailTemplate,
        snapshot: &PaymentSnapshot,
        invoice: Option<&RenderedInvoice>,
    ) -> bool {
        let message = EmailMessage {
            to: snapshot.customer.email.clone(),
            template,
            data: template.data(snapshot, invoice),
            attachments: invoice
                .map(|inv| {
                    vec![EmailAttachment {
                        filename: format!("{}.pdf", inv.invoice_number),
                        path: inv.public_path.clone(),
                    }]
                })
                .unwrap_or_default(),
        };

        self.best_effort
            .run(template.name(), &snapshot.payment.id, self.email.send(&message))
            .await
            .is_some()
    }

    /// Run follow-up work in the background without blocking the response.
    ///
    /// Tasks are tracked so shutdown can wait for them, and a panic is logged
    /// rather than lost.
    pub fn spawn<F>(&self, operation: &'static str, payment_id: String, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(AssertUnwindSafe(fut).catch_unwind().map(move |result| {
            if let Err(panic) = result {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    payment_id = %payment_id,
                    "Dispatch task '{}' panicked: {}",
                    operation,
                    panic_msg
                );
            }
        }));
    }

    /// Wait for every spawned task to finish. New tasks may still be spawned afterwards.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
