//! Test utilities and fixtures for CoursePay integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub use coursepay::config::{CardGatewayConfig, HostedCheckoutConfig};
pub use coursepay::db::{AppState, create_pool, init_db, queries};
pub use coursepay::dispatch::{
    Dispatcher, DownstreamError, EmailReceipt, EmailSender, InvoiceRenderer,
};
pub use coursepay::email::{EmailMessage, EmailTemplate};
pub use coursepay::models::*;
pub use coursepay::payments::{CardGatewayClient, HostedCheckoutClient};

pub const MERCHANT_ID: &str = "1211149";
pub const MERCHANT_SECRET: &str = "test_merchant_secret";
pub const GATEWAY_SECRET_KEY: &str = "sk_test_xxx";
pub const WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const COURSE_PRICE: i64 = 15000;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

// ============ Fixtures ============

pub fn create_test_profile(conn: &Connection, name: &str, role: Role) -> Profile {
    let input = CreateProfile {
        name: name.to_string(),
        email: format!("{}@test.local", name.to_lowercase().replace(' ', ".")),
        role,
    };
    queries::create_profile(conn, &input).expect("Failed to create test profile")
}

pub fn create_test_course(conn: &Connection, title: &str) -> Course {
    let input = CreateCourse {
        title: title.to_string(),
        price: COURSE_PRICE,
        currency: "LKR".to_string(),
    };
    queries::create_course(conn, &input).expect("Failed to create test course")
}

pub fn create_test_payment(
    conn: &Connection,
    user: &Profile,
    course: &Course,
    method: PaymentMethod,
) -> Payment {
    let input = CreatePayment {
        user_id: user.id.clone(),
        course_id: course.id.clone(),
        amount: course.price,
        currency: course.currency.clone(),
        method,
    };
    queries::create_payment(conn, &input).expect("Failed to create test payment")
}

pub fn create_test_api_key(conn: &Connection, profile: &Profile) -> String {
    queries::create_api_key(conn, &profile.id).expect("Failed to create test api key")
}

/// Student, course and one pending payment by `method`.
pub struct PaymentFixture {
    pub student: Profile,
    pub course: Course,
    pub payment: Payment,
}

pub fn create_payment_fixture(conn: &Connection, method: PaymentMethod) -> PaymentFixture {
    let student = create_test_profile(conn, "Nimal Perera", Role::Student);
    let course = create_test_course(conn, "Advanced Mathematics");
    let payment = create_test_payment(conn, &student, &course, method);
    PaymentFixture {
        student,
        course,
        payment,
    }
}

pub fn payment_status(conn: &Connection, payment_id: &str) -> PaymentStatus {
    queries::get_payment_by_id(conn, payment_id)
        .expect("query failed")
        .expect("payment should exist")
        .status
}

// ============ Collaborator fakes ============

/// Records every message. Fails on demand.
#[derive(Default)]
pub struct FakeEmailSender {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: AtomicBool,
}

impl FakeEmailSender {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn templates(&self) -> Vec<EmailTemplate> {
        self.sent().iter().map(|m| m.template).collect()
    }
}

#[async_trait]
impl EmailSender for FakeEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<EmailReceipt, DownstreamError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DownstreamError::Email("smtp unavailable".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(EmailReceipt {
            message_id: Some(format!("msg_{}", sent.len())),
        })
    }
}

/// Counts render calls. Can fail or hang on demand.
#[derive(Default)]
pub struct FakeInvoiceRenderer {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub hang: AtomicBool,
    pub rendered: Mutex<Vec<InvoiceData>>,
}

impl FakeInvoiceRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvoiceRenderer for FakeInvoiceRenderer {
    async fn render(&self, invoice: &InvoiceData) -> Result<RenderedInvoice, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DownstreamError::Invoice("renderer returned 502".into()));
        }
        self.rendered.lock().unwrap().push(invoice.clone());
        Ok(RenderedInvoice {
            public_path: format!("/invoices/{}.pdf", invoice.invoice_number),
            invoice_number: invoice.invoice_number.clone(),
            file_path: format!("/var/invoices/{}.pdf", invoice.invoice_number),
        })
    }
}

// ============ App state ============

/// Application state over a file-backed database, plus handles on the fakes.
///
/// File-backed because every pooled in-memory connection would get its own database.
pub struct TestApp {
    pub state: AppState,
    pub emails: Arc<FakeEmailSender>,
    pub invoices: Arc<FakeInvoiceRenderer>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = dir.path().join("coursepay-test.db");
        let pool = create_pool(db_path.to_str().expect("temp path should be UTF-8"))
            .expect("Failed to create test pool");
        {
            let conn = pool.get().unwrap();
            init_db(&conn).unwrap();
        }

        let emails = Arc::new(FakeEmailSender::default());
        let invoices = Arc::new(FakeInvoiceRenderer::default());
        let dispatcher = Dispatcher::new(
            emails.clone(),
            Some(invoices.clone() as Arc<dyn InvoiceRenderer>),
            Duration::from_secs(5),
        );

        let hosted_checkout = HostedCheckoutClient::new(&HostedCheckoutConfig {
            merchant_id: MERCHANT_ID.to_string(),
            merchant_secret: MERCHANT_SECRET.to_string(),
            sandbox: true,
        });
        let card_gateway = CardGatewayClient::new(
            &CardGatewayConfig {
                secret_key: GATEWAY_SECRET_KEY.to_string(),
                webhook_secret: WEBHOOK_SECRET.to_string(),
            },
            Duration::from_secs(5),
        )
        .expect("Failed to build card gateway client");

        let state = AppState {
            db: pool,
            base_url: "http://localhost:3000".to_string(),
            hosted_checkout: Some(hosted_checkout),
            card_gateway: Some(card_gateway),
            dispatcher,
            checkout_success_url: "http://localhost:5173/payment/success".to_string(),
            checkout_cancel_url: "http://localhost:5173/payment/cancel".to_string(),
        };

        Self {
            state,
            emails,
            invoices,
            _dir: dir,
        }
    }

    /// Same as [`TestApp::new`] with neither payment provider configured.
    pub fn without_providers() -> Self {
        let mut app = Self::new();
        app.state.hosted_checkout = None;
        app.state.card_gateway = None;
        app
    }

    pub fn router(&self) -> Router {
        coursepay::handlers::app(self.state.clone())
    }

    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get test connection")
    }

    /// Wait for background invoice and email tasks.
    pub async fn drain(&self) {
        self.state.dispatcher.drain().await;
    }
}

// ============ Signatures ============

fn md5_upper(input: &str) -> String {
    use md5::{Digest, Md5};
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

/// Signature the hosted checkout puts on a notification.
pub fn hosted_signature(order_id: &str, amount: &str, currency: &str, status_code: &str) -> String {
    md5_upper(&format!(
        "{}{}{}{}{}{}",
        MERCHANT_ID,
        order_id,
        amount,
        currency,
        status_code,
        md5_upper(MERCHANT_SECRET)
    ))
}

/// Form body of a correctly signed hosted-checkout notification.
pub fn hosted_notification_body(payment: &Payment, status_code: &str) -> String {
    let amount = format!("{}.00", payment.amount);
    let signature = hosted_signature(&payment.id, &amount, &payment.currency, status_code);
    format!(
        "merchant_id={}&order_id={}&payment_id=320025071278&amount={}&currency={}&status_code={}&signature={}",
        MERCHANT_ID, payment.id, amount, payment.currency, status_code, signature
    )
}

/// Current Unix timestamp as a string (for webhook signature tests)
pub fn current_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

pub fn compute_gateway_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `gateway-signature` header value for `payload`, signed now.
pub fn gateway_signature_header(payload: &[u8]) -> String {
    let timestamp = current_timestamp();
    let signature = compute_gateway_signature(payload, WEBHOOK_SECRET, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}

// ============ Requests ============

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub async fn post_hosted_notification(app: Router, body: String) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/hosted-checkout")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

pub async fn post_gateway_event(app: Router, payload: &Value, signature: Option<&str>) -> StatusCode {
    let body = serde_json::to_vec(payload).unwrap();
    let header = match signature {
        Some(s) => s.to_string(),
        None => gateway_signature_header(&body),
    };
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/webhooks/card-gateway")
            .header("content-type", "application/json")
            .header("gateway-signature", header)
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
    .status()
}

pub async fn post_json(app: Router, uri: &str, api_key: &str, payload: &Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", api_key))
                .body(Body::from(serde_json::to_vec(payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

pub async fn get_json(app: Router, uri: &str, api_key: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("Authorization", format!("Bearer {}", api_key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}
