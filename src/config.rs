use std::env;
use std::time::Duration;

/// Upper bound on each invoice render or email send.
pub const DEFAULT_BEST_EFFORT_TIMEOUT_SECS: u64 = 15;

/// Hosted-checkout merchant credentials.
#[derive(Debug, Clone)]
pub struct HostedCheckoutConfig {
    pub merchant_id: String,
    pub merchant_secret: String,
    /// Use the provider's sandbox checkout URL
    pub sandbox: bool,
}

/// Card-gateway API credentials.
#[derive(Debug, Clone)]
pub struct CardGatewayConfig {
    pub secret_key: String,
    /// Endpoint secret used to sign webhook deliveries
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub hosted_checkout: Option<HostedCheckoutConfig>,
    pub card_gateway: Option<CardGatewayConfig>,
    /// System-level Resend API key. No key = emails are logged and skipped.
    pub resend_api_key: Option<String>,
    pub email_from: String,
    /// Invoice renderer service endpoint. No URL = invoices are skipped.
    pub invoice_renderer_url: Option<String>,
    /// Timeout for outbound gateway calls
    pub outbound_timeout: Duration,
    /// Upper bound for a single best-effort invoice/email dispatch
    pub best_effort_timeout: Duration,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs(name: &str, default: u64) -> Duration {
    let value = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(value)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("COURSEPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let hosted_checkout = match (
            non_empty("HOSTED_CHECKOUT_MERCHANT_ID"),
            non_empty("HOSTED_CHECKOUT_MERCHANT_SECRET"),
        ) {
            (Some(merchant_id), Some(merchant_secret)) => Some(HostedCheckoutConfig {
                merchant_id,
                merchant_secret,
                sandbox: env::var("HOSTED_CHECKOUT_SANDBOX")
                    .map(|v| v == "1" || v == "true")
                    .unwrap_or(dev_mode),
            }),
            _ => None,
        };

        let card_gateway = match (
            non_empty("CARD_GATEWAY_SECRET_KEY"),
            non_empty("CARD_GATEWAY_WEBHOOK_SECRET"),
        ) {
            (Some(secret_key), Some(webhook_secret)) => Some(CardGatewayConfig {
                secret_key,
                webhook_secret,
            }),
            _ => None,
        };

        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "coursepay.db".to_string()),
            dev_mode,
            hosted_checkout,
            card_gateway,
            resend_api_key: non_empty("RESEND_API_KEY"),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Courses <no-reply@localhost>".to_string()),
            invoice_renderer_url: non_empty("INVOICE_RENDERER_URL"),
            outbound_timeout: secs("OUTBOUND_TIMEOUT_SECS", 10),
            best_effort_timeout: secs("BEST_EFFORT_TIMEOUT_SECS", DEFAULT_BEST_EFFORT_TIMEOUT_SECS),
            checkout_success_url: env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| format!("{}/payment/success", base_url)),
            checkout_cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/payment/cancel", base_url)),
            host,
            port,
            base_url,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
