//! Prefixed ID generation.
//!
//! All IDs carry a `cp_` brand prefix so they can never collide with payment
//! provider identifiers (`cs_`, `pi_`, numeric hosted-checkout payment ids).
//!
//! Format: `cp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &["cp_usr_", "cp_key_", "cp_crs_", "cp_pay_", "cp_grant_"];

/// Validate that a string is a well-formed prefixed ID.
///
/// Cheap check to reject garbage (e.g. a forged hosted-checkout `order_id`)
/// before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Profile,
    ApiKey,
    Course,
    Payment,
    AccessGrant,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Profile => "cp_usr",
            Self::ApiKey => "cp_key",
            Self::Course => "cp_crs",
            Self::Payment => "cp_pay",
            Self::AccessGrant => "cp_grant",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
