// ── Session Store: Session CRUD (§4.1) ──────────────────────────────────────

use super::SessionStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{ProxyConfig, Session};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let proxy_json: Option<String> = row.get("proxy_config")?;
    let proxy_config = proxy_json
        .as_deref()
        .and_then(|s| serde_json::from_str::<ProxyConfig>(s).ok());

    Ok(Session {
        id: row.get("id")?,
        name: row.get("name")?,
        device_jid: row.get("device_jid")?,
        is_connected: row.get::<_, i64>("is_connected")? != 0,
        connection_error: row.get("connection_error")?,
        qr_code: row.get("qr_code")?,
        qr_code_expires_at: row.get("qr_code_expires_at")?,
        proxy_config,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        connected_at: row.get("connected_at")?,
        last_seen: row.get("last_seen")?,
    })
}

impl SessionStore {
    /// Insert a new session row. Fails with `AlreadyExists` on a name
    /// collision (I1: session names are unique).
    pub fn create_session(&self, session: &Session) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let proxy_json = session
            .proxy_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = conn.execute(
            "INSERT INTO sessions (
                id, name, device_jid, is_connected, connection_error,
                qr_code, qr_code_expires_at, proxy_config,
                created_at, updated_at, connected_at, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id,
                session.name,
                session.device_jid,
                session.is_connected as i64,
                session.connection_error,
                session.qr_code,
                session.qr_code_expires_at,
                proxy_json,
                session.created_at,
                session.updated_at,
                session.connected_at,
                session.last_seen,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(GatewayError::AlreadyExists(session.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_session_by_id(&self, id: &str) -> GatewayResult<Session> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id], row_to_session)
            .optional()?
            .ok_or_else(|| GatewayError::not_found(format!("session id {id}")))
    }

    pub fn get_session_by_name(&self, name: &str) -> GatewayResult<Session> {
        let conn = self.conn.lock();
        conn.query_row("SELECT * FROM sessions WHERE name = ?1", params![name], row_to_session)
            .optional()?
            .ok_or_else(|| GatewayError::not_found(format!("session name {name}")))
    }

    pub fn get_session_by_jid(&self, jid: &str) -> GatewayResult<Session> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM sessions WHERE device_jid = ?1",
            params![jid],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| GatewayError::not_found(format!("session jid {jid}")))
    }

    /// Whole-row replace, keyed by id. Used after a runner transitions state
    /// and needs to persist the full new `Session` snapshot.
    pub fn update_session(&self, session: &Session) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let proxy_json = session
            .proxy_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let changed = conn.execute(
            "UPDATE sessions SET
                name = ?2, device_jid = ?3, is_connected = ?4, connection_error = ?5,
                qr_code = ?6, qr_code_expires_at = ?7, proxy_config = ?8,
                updated_at = ?9, connected_at = ?10, last_seen = ?11
             WHERE id = ?1",
            params![
                session.id,
                session.name,
                session.device_jid,
                session.is_connected as i64,
                session.connection_error,
                session.qr_code,
                session.qr_code_expires_at,
                proxy_json,
                session.updated_at,
                session.connected_at,
                session.last_seen,
            ],
        )?;

        if changed == 0 {
            return Err(GatewayError::not_found(format!("session id {}", session.id)));
        }
        Ok(())
    }

    /// Targeted update of the connection-state fields (I2) plus `updated_at`.
    pub fn update_connection_state(
        &self,
        id: &str,
        is_connected: bool,
        device_jid: Option<&str>,
        connection_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let connected_at_clause = if is_connected { Some(now) } else { None };
        let changed = conn.execute(
            "UPDATE sessions SET
                is_connected = ?2, device_jid = ?3, connection_error = ?4,
                qr_code = NULL, qr_code_expires_at = NULL,
                connected_at = COALESCE(?5, connected_at),
                updated_at = ?6
             WHERE id = ?1",
            params![id, is_connected as i64, device_jid, connection_error, connected_at_clause, now],
        )?;
        if changed == 0 {
            return Err(GatewayError::not_found(format!("session id {id}")));
        }
        Ok(())
    }

    /// Targeted QR-code update (I3): sets `qr_code` + `qr_code_expires_at`
    /// and touches `updated_at`.
    pub fn update_qr_code(
        &self,
        id: &str,
        qr_code: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET qr_code = ?2, qr_code_expires_at = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, qr_code, expires_at, now],
        )?;
        if changed == 0 {
            return Err(GatewayError::not_found(format!("session id {id}")));
        }
        Ok(())
    }

    pub fn clear_qr_code(&self, id: &str, now: DateTime<Utc>) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET qr_code = NULL, qr_code_expires_at = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(GatewayError::not_found(format!("session id {id}")));
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, id: &str, now: DateTime<Utc>) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sessions SET last_seen = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// Sessions ordered by `created_at` descending, most-recent first.
    pub fn list_sessions(&self, limit: i64, offset: i64) -> GatewayResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM sessions ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete is idempotent: deleting an id that doesn't exist is not an
    /// error (§4.1 "Delete is idempotent").
    pub fn delete_session(&self, id: &str) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;

    #[test]
    fn create_then_get_by_id_and_name() {
        let store = SessionStore::open_in_memory().unwrap();
        let s = Session::new("alice");
        store.create_session(&s).unwrap();

        let fetched = store.get_session_by_id(&s.id).unwrap();
        assert_eq!(fetched.name, "alice");
        let fetched = store.get_session_by_name("alice").unwrap();
        assert_eq!(fetched.id, s.id);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let store = SessionStore::open_in_memory().unwrap();
        store.create_session(&Session::new("bob")).unwrap();
        let err = store.create_session(&Session::new("bob")).unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let store = SessionStore::open_in_memory().unwrap();
        let err = store.get_session_by_id("nope").unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = SessionStore::open_in_memory().unwrap();
        store.delete_session("nope").unwrap();
        store.delete_session("nope").unwrap();
    }

    #[test]
    fn list_orders_by_created_at_desc() {
        let store = SessionStore::open_in_memory().unwrap();
        let mut first = Session::new("first");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let mut second = Session::new("second");
        second.created_at = Utc::now();
        store.create_session(&first).unwrap();
        store.create_session(&second).unwrap();

        let listed = store.list_sessions(10, 0).unwrap();
        assert_eq!(listed[0].name, "second");
        assert_eq!(listed[1].name, "first");
    }

    #[test]
    fn update_qr_code_then_clear() {
        let store = SessionStore::open_in_memory().unwrap();
        let s = Session::new("carol");
        store.create_session(&s).unwrap();

        let now = Utc::now();
        store
            .update_qr_code(&s.id, "2@abc", now + chrono::Duration::seconds(120), now)
            .unwrap();
        let fetched = store.get_session_by_id(&s.id).unwrap();
        assert_eq!(fetched.qr_code.as_deref(), Some("2@abc"));

        store.clear_qr_code(&s.id, now).unwrap();
        let fetched = store.get_session_by_id(&s.id).unwrap();
        assert!(fetched.qr_code.is_none());
    }
}
