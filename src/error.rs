use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error messages shared across handlers and tests.
pub mod msg {
    pub const PAYMENT_NOT_FOUND: &str = "Payment not found";
    pub const COURSE_NOT_FOUND: &str = "Course not found";
    pub const PROFILE_NOT_FOUND: &str = "Profile not found";
    pub const ADMIN_ROLE_REQUIRED: &str = "Admin role required";
    pub const ADMIN_ID_MISMATCH: &str = "adminId does not match the authenticated admin";
    pub const NOT_BANK_TRANSFER: &str = "Only bank-transfer payments can be reviewed by an admin";
    pub const ALREADY_HAS_ACCESS: &str = "You already have access to this course";
    pub const INVALID_SIGNATURE: &str = "Invalid signature";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
    pub const AMOUNT_MISMATCH: &str = "Reported amount does not match the payment";
    pub const CURRENCY_MISMATCH: &str = "Reported currency does not match the payment";
    pub const GATEWAY_NOT_CONFIGURED: &str = "Card gateway is not configured";
    pub const HOSTED_CHECKOUT_NOT_CONFIGURED: &str = "Hosted checkout is not configured";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Well-formed request for an ineligible or conflicting state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match &self {
            AppError::NotFound(msg) => ("Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => ("Bad request", Some(msg.clone())),
            AppError::Validation(msg) => ("Validation failed", Some(msg.clone())),
            AppError::Unauthorized => ("Unauthorized", None),
            AppError::Forbidden(msg) => ("Forbidden", Some(msg.clone())),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                ("Internal server error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Turn a missing row into `AppError::NotFound`.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}
