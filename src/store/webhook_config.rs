// ── Session Store: WebhookConfig CRUD (§4.1, §3 WebhookConfig) ─────────────

use super::SessionStore;
use crate::atoms::error::GatewayResult;
use crate::atoms::types::{DomainEventType, WebhookConfig};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_config(row: &Row) -> rusqlite::Result<WebhookConfig> {
    let events_json: String = row.get("events")?;
    let events: Vec<DomainEventType> = serde_json::from_str(&events_json).unwrap_or_default();
    Ok(WebhookConfig {
        session_id: row.get("session_id")?,
        url: row.get("url")?,
        secret: row.get("secret")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        events,
    })
}

impl SessionStore {
    /// Insert-or-replace the single webhook config row for a session
    /// (0..1 per session, §3).
    pub fn upsert_webhook_config(&self, cfg: &WebhookConfig) -> GatewayResult<()> {
        let conn = self.conn.lock();
        let events_json = serde_json::to_string(&cfg.events)?;
        conn.execute(
            "INSERT INTO webhook_configs (session_id, url, secret, enabled, events)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                url = excluded.url,
                secret = excluded.secret,
                enabled = excluded.enabled,
                events = excluded.events",
            params![cfg.session_id, cfg.url, cfg.secret, cfg.enabled as i64, events_json],
        )?;
        Ok(())
    }

    /// Returns `Ok(None)` (not `NotFound`) when a session has no webhook
    /// configured — the dispatcher's "no config ⇒ drop" path (§4.5 step 2)
    /// reads this as an absence, not an error.
    pub fn get_webhook_config(&self, session_id: &str) -> GatewayResult<Option<WebhookConfig>> {
        let conn = self.conn.lock();
        let cfg = conn
            .query_row(
                "SELECT * FROM webhook_configs WHERE session_id = ?1",
                params![session_id],
                row_to_config,
            )
            .optional()?;
        Ok(cfg)
    }

    pub fn delete_webhook_config(&self, session_id: &str) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM webhook_configs WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Session;

    fn store_with_session(name: &str) -> (SessionStore, String) {
        let store = SessionStore::open_in_memory().unwrap();
        let s = Session::new(name);
        store.create_session(&s).unwrap();
        (store, s.id)
    }

    #[test]
    fn upsert_then_get() {
        let (store, id) = store_with_session("alice");
        let cfg = WebhookConfig {
            session_id: id.clone(),
            url: "https://example.com/hook".into(),
            secret: Some("s3cr3t".into()),
            enabled: true,
            events: vec![DomainEventType::Message],
        };
        store.upsert_webhook_config(&cfg).unwrap();

        let fetched = store.get_webhook_config(&id).unwrap().unwrap();
        assert_eq!(fetched.url, "https://example.com/hook");
        assert_eq!(fetched.events, vec![DomainEventType::Message]);
    }

    #[test]
    fn upsert_replaces_existing() {
        let (store, id) = store_with_session("bob");
        store
            .upsert_webhook_config(&WebhookConfig {
                session_id: id.clone(),
                url: "https://old.example.com".into(),
                secret: None,
                enabled: true,
                events: vec![],
            })
            .unwrap();
        store
            .upsert_webhook_config(&WebhookConfig {
                session_id: id.clone(),
                url: "https://new.example.com".into(),
                secret: None,
                enabled: false,
                events: vec![],
            })
            .unwrap();

        let fetched = store.get_webhook_config(&id).unwrap().unwrap();
        assert_eq!(fetched.url, "https://new.example.com");
        assert!(!fetched.enabled);
    }

    #[test]
    fn missing_config_is_none_not_error() {
        let (store, id) = store_with_session("carol");
        assert!(store.get_webhook_config(&id).unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let (store, id) = store_with_session("dana");
        store.delete_webhook_config(&id).unwrap();
        store.delete_webhook_config(&id).unwrap();
    }
}
