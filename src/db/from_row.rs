//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// An unknown value in the database surfaces as a query error instead of a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROFILE_COLS: &str = "id, name, email, role, created_at";

pub const COURSE_COLS: &str = "id, title, price, currency, created_at";

pub const PAYMENT_COLS: &str = "id, user_id, course_id, amount, currency, method, status, external_reference, gateway_payment_id, failure_reason, reviewed_by, admin_notes, invoice_number, invoice_url, created_at, completed_at";

pub const ACCESS_GRANT_COLS: &str = "id, user_id, course_id, payment_id, granted, granted_at";

// ============ FromRow Implementations ============

impl FromRow for Profile {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Profile {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: parse_enum(row, 3, "role")?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            price: row.get(2)?,
            currency: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            method: parse_enum(row, 5, "method")?,
            status: parse_enum(row, 6, "status")?,
            external_reference: row.get(7)?,
            gateway_payment_id: row.get(8)?,
            failure_reason: row.get(9)?,
            reviewed_by: row.get(10)?,
            admin_notes: row.get(11)?,
            invoice_number: row.get(12)?,
            invoice_url: row.get(13)?,
            created_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }
}

impl FromRow for AccessGrant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AccessGrant {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            payment_id: row.get(3)?,
            granted: row.get::<_, i32>(4)? != 0,
            granted_at: row.get(5)?,
        })
    }
}
