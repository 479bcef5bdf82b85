//! CoursePay - payment reconciliation and course access for an online academy
//!
//! This library turns payment notifications from a hosted checkout, a card
//! gateway and admin bank-transfer review into durable course access, then
//! issues invoices and emails on a best-effort basis.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod invoice;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod reconcile;
pub mod util;
