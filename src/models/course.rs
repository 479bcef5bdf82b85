use serde::{Deserialize, Serialize};

/// Read-only course snapshot. Owned by the catalogue side of the app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    /// Price in whole major currency units (e.g. 15000 for LKR 15,000)
    pub price: i64,
    /// ISO 4217 code, uppercase (e.g. "LKR")
    pub currency: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    pub price: i64,
    pub currency: String,
}
