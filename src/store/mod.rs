// ── Session Store (C1) ──────────────────────────────────────────────────────
// Durable storage for Session and WebhookConfig rows, backed by SQLite via
// rusqlite. One connection per process, serialized behind a parking_lot
// Mutex — the store sees far less write contention than the per-session
// runners generate on their own mailboxes, so a single connection is enough.
//
// Module layout:
//   schema         — migrations, PRAGMA tuning, in-memory test helper
//   sessions       — Session CRUD (§4.1)
//   webhook_config — WebhookConfig CRUD (§4.1)

use crate::atoms::error::GatewayResult;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

mod schema;
mod sessions;
mod webhook_config;

/// Thread-safe handle to the gateway's SQLite database.
pub struct SessionStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the database at `database_url` and run migrations.
    /// Pass `:memory:` for an ephemeral store (used by tests).
    pub fn open(database_url: &str) -> GatewayResult<Self> {
        info!(path = %database_url, "opening session store");
        let conn = Connection::open(database_url)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        conn.execute_batch("PRAGMA synchronous=NORMAL;").ok();

        schema::run_migrations(&conn)?;

        Ok(SessionStore { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(SessionStore { conn: Mutex::new(conn) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = SessionStore::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='sessions'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
