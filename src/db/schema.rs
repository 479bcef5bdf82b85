use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Profiles (identity + role). Owned by the auth side of the app, read-only here.
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK (role IN ('student', 'admin')),
            created_at INTEGER NOT NULL
        );

        -- Bearer credentials (hash only, the raw key is shown once)
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            key_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_profile ON api_keys(profile_id);

        -- Courses (catalogue, read-only here)
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            price INTEGER NOT NULL CHECK (price >= 0),
            currency TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Payments. Status only leaves 'pending' through a guarded UPDATE.
        -- 'approved' and 'bank' are legacy spellings still accepted on read.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES profiles(id),
            course_id TEXT NOT NULL REFERENCES courses(id),
            amount INTEGER NOT NULL CHECK (amount >= 0),
            currency TEXT NOT NULL,
            method TEXT NOT NULL CHECK (method IN ('hosted_checkout', 'card_gateway', 'bank_transfer', 'bank')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'approved', 'failed', 'rejected')),
            external_reference TEXT,
            gateway_payment_id TEXT,
            failure_reason TEXT,
            reviewed_by TEXT REFERENCES profiles(id),
            admin_notes TEXT,
            invoice_number TEXT,
            invoice_url TEXT,
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id);
        CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_external_ref
            ON payments(method, external_reference) WHERE external_reference IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_payments_gateway_payment
            ON payments(gateway_payment_id) WHERE gateway_payment_id IS NOT NULL;

        -- Access grants. UNIQUE(user_id, course_id) is the only thing keeping grants exactly-once.
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES profiles(id),
            course_id TEXT NOT NULL REFERENCES courses(id),
            payment_id TEXT NOT NULL REFERENCES payments(id),
            granted INTEGER NOT NULL DEFAULT 1,
            granted_at INTEGER NOT NULL,
            UNIQUE(user_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_payment ON purchases(payment_id);
        "#,
    )?;
    Ok(())
}
