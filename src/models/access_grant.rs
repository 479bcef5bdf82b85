use serde::{Deserialize, Serialize};

/// Durable right of a user to access a course (stored in `purchases`).
///
/// Unique per (user, course). Never deleted by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    /// Payment that first unlocked the course
    pub payment_id: String,
    pub granted: bool,
    pub granted_at: i64,
}

/// Response body for the course-access check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAccess {
    pub course_id: String,
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<i64>,
}
