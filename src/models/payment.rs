use serde::{Deserialize, Serialize};

/// How the customer is paying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Redirect to the regional hosted checkout page, confirmed by server-to-server notify
    HostedCheckout,
    /// Card gateway checkout session, confirmed by signed webhook
    CardGateway,
    /// Manual bank transfer, confirmed by an admin
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostedCheckout => "hosted_checkout",
            Self::CardGateway => "card_gateway",
            Self::BankTransfer => "bank_transfer",
        }
    }

    /// Human-readable label for invoices and emails.
    pub fn label(&self) -> &'static str {
        match self {
            Self::HostedCheckout => "Online payment",
            Self::CardGateway => "Card",
            Self::BankTransfer => "Bank transfer",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted_checkout" => Ok(Self::HostedCheckout),
            "card_gateway" => Ok(Self::CardGateway),
            // "bank" is the legacy tag for the same flow
            "bank_transfer" | "bank" => Ok(Self::BankTransfer),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment lifecycle: `pending -> {completed, failed, rejected}`.
///
/// Every non-pending status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    /// Success terminal. Stored rows spelled `approved` read back as this.
    Completed,
    /// Provider reported the payment as failed or cancelled
    Failed,
    /// Admin declined a bank transfer
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" | "approved" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure terminals a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    Failed,
    Rejected,
}

impl From<FailureStatus> for PaymentStatus {
    fn from(status: FailureStatus) -> Self {
        match status {
            FailureStatus::Failed => PaymentStatus::Failed,
            FailureStatus::Rejected => PaymentStatus::Rejected,
        }
    }
}

/// One attempt by one user to pay for one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    /// Whole major currency units
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Hosted-checkout order id or card-gateway checkout session id
    pub external_reference: Option<String>,
    /// Provider's own payment id (hosted-checkout payment_id, card-gateway payment intent)
    pub gateway_payment_id: Option<String>,
    pub failure_reason: Option<String>,
    /// Admin who approved or rejected a bank transfer
    pub reviewed_by: Option<String>,
    pub admin_notes: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_url: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: String,
    pub course_id: String,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
}

/// Who is driving a state change, recorded on the row.
#[derive(Debug, Clone, Default)]
pub struct TransitionDetails<'a> {
    pub gateway_payment_id: Option<&'a str>,
    pub reviewed_by: Option<&'a str>,
    pub notes: Option<&'a str>,
}

/// Payment as returned to API callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProjection {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl From<&Payment> for PaymentProjection {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id.clone(),
            user_id: p.user_id.clone(),
            course_id: p.course_id.clone(),
            amount: p.amount,
            currency: p.currency.clone(),
            method: p.method,
            status: p.status,
            reviewed_by: p.reviewed_by.clone(),
            admin_notes: p.admin_notes.clone(),
            failure_reason: p.failure_reason.clone(),
            invoice_number: p.invoice_number.clone(),
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

/// Filters for the admin payment listing.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PaymentFilters {
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
}
