//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema includes:
/// - `gmail_credentials` table (one OAuth credential record per user)
/// - `gmail_watches` table (at most one push subscription per user)
pub const SQLITE_INIT: &str = r#"
-- ---------------------------------------------------------------------------
-- OAuth credentials (one row per user)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS gmail_credentials (
    user_id TEXT PRIMARY KEY NOT NULL,
    mailbox_email TEXT NULL,
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NOT NULL, -- RFC3339
    granted_scopes TEXT NOT NULL DEFAULT '', -- space separated
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

-- ---------------------------------------------------------------------------
-- Gmail push subscriptions (one row per user)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS gmail_watches (
    user_id TEXT PRIMARY KEY NOT NULL,
    mailbox_email TEXT NOT NULL,
    history_id INTEGER NOT NULL,
    expires_at TEXT NOT NULL, -- RFC3339
    topic_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active', -- active | expired
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_gmail_watches_mailbox ON gmail_watches(mailbox_email);
CREATE INDEX IF NOT EXISTS idx_gmail_watches_status ON gmail_watches(status);
"#;
