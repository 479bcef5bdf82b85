pub mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::dispatch::Dispatcher;
use crate::payments::{CardGatewayClient, HostedCheckoutClient};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL, used to build the hosted-checkout notify URL
    pub base_url: String,
    /// None when the provider is not configured; its endpoints then refuse work
    pub hosted_checkout: Option<HostedCheckoutClient>,
    pub card_gateway: Option<CardGatewayClient>,
    /// Best-effort invoice and email dispatch
    pub dispatcher: Dispatcher,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

/// Every pooled connection runs in WAL mode, waits on locks instead of failing
/// fast and enforces foreign keys.
fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(configure_connection);
    Pool::builder().max_size(10).build(manager)
}
