use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, ToSql, params, types::Value};

use crate::error::{AppError, OptionExt, Result, msg};
use crate::id::EntityType;
use crate::models::*;
use crate::util::hash_secret;

use super::from_row::{
    ACCESS_GRANT_COLS, COURSE_COLS, PAYMENT_COLS, PROFILE_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Profiles ============

pub fn create_profile(conn: &Connection, input: &CreateProfile) -> Result<Profile> {
    let id = EntityType::Profile.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO profiles (id, name, email, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.name, &input.email, input.role.as_str(), now],
    )?;

    Ok(Profile {
        id,
        name: input.name.clone(),
        email: input.email.clone(),
        role: input.role,
        created_at: now,
    })
}

pub fn get_profile(conn: &Connection, id: &str) -> Result<Option<Profile>> {
    query_one(
        conn,
        &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLS),
        &[&id],
    )
}

pub fn count_profiles(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))
        .map_err(Into::into)
}

// ============ API Keys ============

/// Generate a bearer key with cp_ prefix
pub fn generate_api_key() -> String {
    format!("cp_{}", uuid::Uuid::new_v4().as_simple())
}

/// Issue a bearer key for a profile. Only the hash is stored; the raw key is returned once.
pub fn create_api_key(conn: &Connection, profile_id: &str) -> Result<String> {
    let key = generate_api_key();

    conn.execute(
        "INSERT INTO api_keys (id, profile_id, key_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![EntityType::ApiKey.gen_id(), profile_id, hash_secret(&key), now()],
    )?;

    Ok(key)
}

/// Resolve a bearer key to its profile. Revoked keys resolve to nothing.
pub fn get_profile_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<Profile>> {
    let hash = hash_secret(api_key);

    let key: Option<(String, String)> = conn
        .query_row(
            "SELECT id, profile_id FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
            params![&hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((key_id, profile_id)) = key else {
        return Ok(None);
    };

    // Best effort, a failed touch must not fail authentication
    let _ = conn.execute(
        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
        params![now(), &key_id],
    );

    get_profile(conn, &profile_id)
}

pub fn revoke_api_key(conn: &Connection, api_key: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_keys SET revoked_at = ?1 WHERE key_hash = ?2 AND revoked_at IS NULL",
        params![now(), hash_secret(api_key)],
    )?;
    Ok(affected > 0)
}

// ============ Courses ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let now = now();
    let currency = input.currency.to_uppercase();

    conn.execute(
        "INSERT INTO courses (id, title, price, currency, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.title, input.price, &currency, now],
    )?;

    Ok(Course {
        id,
        title: input.title.clone(),
        price: input.price,
        currency,
        created_at: now,
    })
}

pub fn get_course(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

// ============ Payments ============

/// Create a payment in `pending` status.
pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, user_id, course_id, amount, currency, method, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
        params![
            &id,
            &input.user_id,
            &input.course_id,
            input.amount,
            &input.currency,
            input.method.as_str(),
            now
        ],
    )?;

    Ok(Payment {
        id,
        user_id: input.user_id.clone(),
        course_id: input.course_id.clone(),
        amount: input.amount,
        currency: input.currency.clone(),
        method: input.method,
        status: PaymentStatus::Pending,
        external_reference: None,
        gateway_payment_id: None,
        failure_reason: None,
        reviewed_by: None,
        admin_notes: None,
        invoice_number: None,
        invoice_url: None,
        created_at: now,
        completed_at: None,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

/// Look up by provider reference (hosted-checkout order id, card-gateway session id).
pub fn get_payment_by_external_reference(
    conn: &Connection,
    method: PaymentMethod,
    reference: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE method = ?1 AND external_reference = ?2",
            PAYMENT_COLS
        ),
        &[&method.as_str(), &reference],
    )
}

/// Look up by the provider's own payment id (card-gateway payment intent).
pub fn get_payment_by_gateway_payment_id(
    conn: &Connection,
    method: PaymentMethod,
    gateway_payment_id: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE method = ?1 AND gateway_payment_id = ?2",
            PAYMENT_COLS
        ),
        &[&method.as_str(), &gateway_payment_id],
    )
}

pub fn set_payment_external_reference(conn: &Connection, id: &str, reference: &str) -> Result<()> {
    conn.execute(
        "UPDATE payments SET external_reference = ?1 WHERE id = ?2",
        params![reference, id],
    )?;
    Ok(())
}

/// Record the rendered invoice on a completed payment.
pub fn set_payment_invoice(
    conn: &Connection,
    id: &str,
    invoice_number: &str,
    invoice_url: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE payments SET invoice_number = ?1, invoice_url = ?2 WHERE id = ?3",
        params![invoice_number, invoice_url, id],
    )?;
    Ok(())
}

/// List payments newest first, optionally filtered by status and method.
pub fn list_payments(conn: &Connection, filters: &PaymentFilters) -> Result<Vec<Payment>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filters.status {
        // Legacy success rows are stored as 'approved'
        if status == PaymentStatus::Completed {
            conditions.push("status IN ('completed', 'approved')");
        } else {
            values.push(Value::Text(status.as_str().to_string()));
            conditions.push("status = ?");
        }
    }
    if let Some(method) = filters.method {
        if method == PaymentMethod::BankTransfer {
            conditions.push("method IN ('bank_transfer', 'bank')");
        } else {
            values.push(Value::Text(method.as_str().to_string()));
            conditions.push("method = ?");
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT {} FROM payments{} ORDER BY created_at DESC, id DESC",
        PAYMENT_COLS, where_clause
    );
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
    query_all(conn, &sql, &params)
}

/// Outcome of a guarded status transition.
#[derive(Debug, Clone)]
pub enum Transition {
    /// This call moved the payment out of `pending`.
    Applied(Payment),
    /// The payment was already in the requested terminal. Nothing was written.
    Unchanged(Payment),
}

impl Transition {
    pub fn payment(&self) -> &Payment {
        match self {
            Transition::Applied(p) | Transition::Unchanged(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Transition::Applied(p) | Transition::Unchanged(p) => p,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

fn conflicting_status(payment: &Payment) -> AppError {
    AppError::Validation(format!(
        "Payment {} is already {}",
        payment.id, payment.status
    ))
}

/// Atomically move a payment from `pending` to `completed`.
///
/// Uses compare-and-swap (`WHERE status = 'pending'`) so that of any number of
/// concurrent callers exactly one observes `Transition::Applied`.
///
/// Returns:
/// - `Ok(Applied)` if this call made the transition
/// - `Ok(Unchanged)` if the payment was already completed (redelivery)
/// - `Err(Validation)` if the payment is in a failure terminal
/// - `Err(NotFound)` if the payment does not exist
pub fn try_complete_payment(
    conn: &Connection,
    id: &str,
    details: &TransitionDetails<'_>,
) -> Result<Transition> {
    let affected = conn.execute(
        "UPDATE payments
         SET status = 'completed',
             completed_at = ?2,
             gateway_payment_id = COALESCE(?3, gateway_payment_id),
             reviewed_by = COALESCE(?4, reviewed_by),
             admin_notes = COALESCE(?5, admin_notes)
         WHERE id = ?1 AND status = 'pending'",
        params![
            id,
            now(),
            details.gateway_payment_id,
            details.reviewed_by,
            details.notes
        ],
    )?;

    let payment = get_payment_by_id(conn, id)?
        .or_not_found(msg::PAYMENT_NOT_FOUND)?;

    if affected > 0 {
        return Ok(Transition::Applied(payment));
    }
    if payment.status.is_success() {
        Ok(Transition::Unchanged(payment))
    } else {
        Err(conflicting_status(&payment))
    }
}

/// Atomically move a payment from `pending` to a failure terminal.
///
/// Same guard as [`try_complete_payment`]. Redelivery of the same failure
/// terminal is `Unchanged`; any other terminal is a conflict.
pub fn try_fail_payment(
    conn: &Connection,
    id: &str,
    status: FailureStatus,
    reason: Option<&str>,
    details: &TransitionDetails<'_>,
) -> Result<Transition> {
    let target: PaymentStatus = status.into();

    let affected = conn.execute(
        "UPDATE payments
         SET status = ?2,
             completed_at = ?3,
             failure_reason = ?4,
             gateway_payment_id = COALESCE(?5, gateway_payment_id),
             reviewed_by = COALESCE(?6, reviewed_by),
             admin_notes = COALESCE(?7, admin_notes)
         WHERE id = ?1 AND status = 'pending'",
        params![
            id,
            target.as_str(),
            now(),
            reason,
            details.gateway_payment_id,
            details.reviewed_by,
            details.notes
        ],
    )?;

    let payment = get_payment_by_id(conn, id)?
        .or_not_found(msg::PAYMENT_NOT_FOUND)?;

    if affected > 0 {
        return Ok(Transition::Applied(payment));
    }
    if payment.status == target {
        Ok(Transition::Unchanged(payment))
    } else {
        Err(conflicting_status(&payment))
    }
}

// ============ Access Grants ============

/// Grant a user access to a course. Returns true if a new grant was created.
///
/// Relies on `UNIQUE(user_id, course_id)`: concurrent or repeated calls for the
/// same pair leave exactly one row and never error.
pub fn grant_course_access(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    payment_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO purchases (id, user_id, course_id, payment_id, granted, granted_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)
         ON CONFLICT(user_id, course_id) DO NOTHING",
        params![
            EntityType::AccessGrant.gen_id(),
            user_id,
            course_id,
            payment_id,
            now()
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_access_grant(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<AccessGrant>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE user_id = ?1 AND course_id = ?2 AND granted = 1",
            ACCESS_GRANT_COLS
        ),
        &[&user_id, &course_id],
    )
}

pub fn count_access_grants(conn: &Connection, user_id: &str, course_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM purchases WHERE user_id = ?1 AND course_id = ?2",
        params![user_id, course_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}
