// ── Session Store: Schema ───────────────────────────────────────────────────

use crate::atoms::error::GatewayResult;
use rusqlite::Connection;
use tracing::info;

pub fn run_migrations(conn: &Connection) -> GatewayResult<()> {
    info!("running session store migrations");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id                  TEXT PRIMARY KEY,
        name                TEXT NOT NULL UNIQUE,
        device_jid          TEXT,
        is_connected        INTEGER NOT NULL DEFAULT 0,
        connection_error    TEXT,
        qr_code             TEXT,
        qr_code_expires_at  TEXT,
        proxy_config        TEXT,
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        connected_at        TEXT,
        last_seen           TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_sessions_device_jid ON sessions(device_jid);

    CREATE TABLE IF NOT EXISTS webhook_configs (
        session_id  TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
        url         TEXT NOT NULL,
        secret      TEXT,
        enabled     INTEGER NOT NULL DEFAULT 1,
        events      TEXT NOT NULL DEFAULT '[]'
    );
";
