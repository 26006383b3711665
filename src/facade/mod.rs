// ── Lifecycle API Facade (C7) ────────────────────────────────────────────────
// Synchronous, typed entry point external handlers call: Create, Connect,
// Disconnect, Logout, Delete, GetQR, PairPhone, Get, List. Validates inputs,
// resolves the runner via the Registry, and maps idempotence signals to a
// success reply instead of an error (§4.7, §7).

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{ProxyConfig, QrCodeArtifact, Session, SessionStatus};
use crate::config::GatewayConfig;
use crate::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;

/// What `Get`/`List` return — the stored snapshot plus its derived status,
/// so callers never recompute `Session::status()` themselves.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session: Session,
    pub status: SessionStatus,
}

/// Aggregate counts the operator dashboard surface wants alongside a page of
/// sessions (SPEC_FULL.md "Status DTO / introspection surface", grounded in
/// the teacher's `ChannelStatus` DTO shape).
#[derive(Debug, Clone, Default)]
pub struct SessionCounts {
    pub total: usize,
    pub connected: usize,
    pub connecting: usize,
    pub qrcode: usize,
    pub disconnected: usize,
    pub error: usize,
}

pub struct LifecycleFacade {
    registry: Arc<SessionRegistry>,
    default_timeout: Duration,
    connect_timeout: Duration,
}

impl LifecycleFacade {
    pub fn new(registry: Arc<SessionRegistry>, config: &GatewayConfig) -> Self {
        LifecycleFacade {
            registry,
            default_timeout: config.facade_default_timeout,
            connect_timeout: config.facade_connect_timeout,
        }
    }

    fn validate_name(name: &str) -> GatewayResult<()> {
        if name.trim().is_empty() {
            return Err(GatewayError::invalid_input("session name must not be empty"));
        }
        Ok(())
    }

    fn validate_proxy(proxy: &Option<ProxyConfig>) -> GatewayResult<()> {
        if let Some(p) = proxy {
            p.validate().map_err(GatewayError::invalid_input)?;
        }
        Ok(())
    }

    /// §4.7 step 1 "valid e164 phone": strip everything but digits, require
    /// at least 10 remaining (a minimally plausible national number length).
    pub fn normalize_phone(raw: &str) -> GatewayResult<String> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 10 {
            return Err(GatewayError::invalid_input(format!("not a valid E.164 phone number: {raw}")));
        }
        Ok(digits)
    }

    pub async fn create(&self, name: String, proxy_config: Option<ProxyConfig>) -> GatewayResult<SessionView> {
        Self::validate_name(&name)?;
        Self::validate_proxy(&proxy_config)?;

        let mut session = Session::new(name);
        session.proxy_config = proxy_config;
        let now = session.created_at;
        self.registry.create(session.clone()).await?;
        Ok(SessionView { status: session.status(now), session })
    }

    pub async fn connect(&self, id: &str) -> GatewayResult<(Session, Option<String>)> {
        let handle = self.registry.acquire(&id.to_string()).await?;
        match handle.connect(self.connect_timeout).await {
            Ok(reply) => Ok((reply.session, reply.message)),
            Err(e) if e.is_idempotence_signal() => {
                let session = handle.get_status(self.default_timeout).await?;
                Ok((session, Some(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn disconnect(&self, id: &str) -> GatewayResult<(Session, Option<String>)> {
        let handle = self.registry.acquire(&id.to_string()).await?;
        match handle.disconnect(self.default_timeout).await {
            Ok(reply) => Ok((reply.session, reply.message)),
            Err(e) if e.is_idempotence_signal() => {
                let session = handle.get_status(self.default_timeout).await?;
                Ok((session, Some(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn logout(&self, id: &str) -> GatewayResult<(Session, Option<String>)> {
        let handle = self.registry.acquire(&id.to_string()).await?;
        match handle.logout(self.default_timeout).await {
            Ok(reply) => Ok((reply.session, reply.message)),
            Err(e) if e.is_idempotence_signal() => {
                let session = handle.get_status(self.default_timeout).await?;
                Ok((session, Some(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// §4.4 idempotence: "Delete on missing returns NotFound." Acquire
    /// itself surfaces `NotFound` when the store has no such row, so the
    /// mapping falls out naturally — we don't special-case it here.
    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        let id = id.to_string();
        let handle = self.registry.acquire(&id).await?;
        handle.delete(self.default_timeout).await?;
        self.registry.forget(&id).await;
        Ok(())
    }

    pub async fn get_qr(&self, id: &str) -> GatewayResult<QrCodeArtifact> {
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle.get_qr(self.default_timeout).await
    }

    pub async fn pair_phone(&self, id: &str, raw_phone: &str) -> GatewayResult<String> {
        let digits = Self::normalize_phone(raw_phone)?;
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle.pair_phone(digits, self.default_timeout).await
    }

    pub async fn send_text(&self, id: &str, to: &str, text: &str) -> GatewayResult<String> {
        if to.trim().is_empty() || text.is_empty() {
            return Err(GatewayError::invalid_input("`to` and `text` must not be empty"));
        }
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle.send_text(to.to_string(), text.to_string(), self.default_timeout).await
    }

    pub async fn send_media(
        &self,
        id: &str,
        to: &str,
        media_url: &str,
        caption: Option<String>,
    ) -> GatewayResult<String> {
        if to.trim().is_empty() || media_url.trim().is_empty() {
            return Err(GatewayError::invalid_input("`to` and `mediaUrl` must not be empty"));
        }
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle.send_media(to.to_string(), media_url.to_string(), caption, self.default_timeout).await
    }

    pub async fn send_location(&self, id: &str, to: &str, latitude: f64, longitude: f64) -> GatewayResult<String> {
        if to.trim().is_empty() {
            return Err(GatewayError::invalid_input("`to` must not be empty"));
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(GatewayError::invalid_input("latitude/longitude out of range"));
        }
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle.send_location(to.to_string(), latitude, longitude, self.default_timeout).await
    }

    pub async fn send_contact(&self, id: &str, to: &str, contact_jid: &str, display_name: &str) -> GatewayResult<String> {
        if to.trim().is_empty() || contact_jid.trim().is_empty() {
            return Err(GatewayError::invalid_input("`to` and `contactJid` must not be empty"));
        }
        let handle = self.registry.acquire(&id.to_string()).await?;
        handle
            .send_contact(to.to_string(), contact_jid.to_string(), display_name.to_string(), self.default_timeout)
            .await
    }

    /// Bypasses the runner and reads the Store directly (§4.7 "List/Get
    /// operations bypass the runner... for efficiency"). Additionally
    /// queries `Adapter.status(id)` and reconciles the row opportunistically
    /// when it disagrees with what's on file (§4.7) — best-effort only; a
    /// failed or unreachable adapter call never fails the read.
    pub async fn get(&self, id: &str, store: &crate::store::SessionStore) -> GatewayResult<SessionView> {
        let mut session = store.get_session_by_id(id)?;

        if let Ok(live) = self.registry.adapter_status(&session.id).await {
            let stale = live.connected != session.is_connected
                || (live.device_jid.is_some() && live.device_jid != session.device_jid);
            if stale {
                let now = chrono::Utc::now();
                if store
                    .update_connection_state(
                        &session.id,
                        live.connected,
                        live.device_jid.as_deref(),
                        session.connection_error.as_deref(),
                        now,
                    )
                    .is_ok()
                {
                    session = store.get_session_by_id(id)?;
                }
            }
        }

        let now = chrono::Utc::now();
        Ok(SessionView { status: session.status(now), session })
    }

    pub fn list(&self, store: &crate::store::SessionStore, limit: i64, offset: i64) -> GatewayResult<Vec<SessionView>> {
        let now = chrono::Utc::now();
        Ok(store
            .list_sessions(limit, offset)?
            .into_iter()
            .map(|session| SessionView { status: session.status(now), session })
            .collect())
    }

    /// Per-status counts for an operator dashboard, computed over the full
    /// table — cheap relative to the runner traffic this service expects
    /// (sessions number in the dozens to hundreds, §1).
    pub fn counts(&self, store: &crate::store::SessionStore) -> GatewayResult<SessionCounts> {
        let now = chrono::Utc::now();
        let mut counts = SessionCounts::default();
        for session in store.list_sessions(i64::MAX, 0)? {
            counts.total += 1;
            match session.status(now) {
                SessionStatus::Connected => counts.connected += 1,
                SessionStatus::Connecting => counts.connecting += 1,
                SessionStatus::QrCode => counts.qrcode += 1,
                SessionStatus::Disconnected => counts.disconnected += 1,
                SessionStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::EventDispatcher;
    use crate::protocol::fake::FakeProtocolAdapter;
    use crate::protocol::{ProtocolAdapter, ProtocolEvent};
    use crate::store::SessionStore;

    async fn build() -> (LifecycleFacade, Arc<SessionStore>, Arc<FakeProtocolAdapter>) {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let adapter = Arc::new(FakeProtocolAdapter::new());
        let adapter_dyn: Arc<dyn ProtocolAdapter> = adapter.clone();
        let (delivery_tx, _rx) = tokio::sync::mpsc::channel(64);
        let dispatcher = Arc::new(EventDispatcher::new(store.clone(), delivery_tx));
        let cfg = GatewayConfig::default();
        let registry = Arc::new(SessionRegistry::new(store.clone(), adapter_dyn, dispatcher, &cfg));
        let facade = LifecycleFacade::new(registry, &cfg);
        (facade, store, adapter)
    }

    #[tokio::test]
    async fn create_rejects_empty_name() {
        let (facade, _store, _adapter) = build().await;
        let err = facade.create(String::new(), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_then_connect_transitions_to_connecting() {
        let (facade, _store, _adapter) = build().await;
        let view = facade.create("alice".into(), None).await.unwrap();
        assert_eq!(view.status, SessionStatus::Disconnected);

        let (session, message) = facade.connect(&view.session.id).await.unwrap();
        assert!(message.is_none());
        assert_eq!(session.id, view.session.id);
    }

    #[tokio::test]
    async fn connect_on_already_connected_is_idempotent_with_message() {
        let (facade, store, adapter) = build().await;
        let view = facade.create("bob".into(), None).await.unwrap();
        facade.connect(&view.session.id).await.unwrap();
        adapter.push_event(&view.session.id, ProtocolEvent::Connected).await;
        // let the runner process Connected — but it needs a device_jid on
        // file first per the state machine's guard; simulate pairing.
        adapter
            .push_event(
                &view.session.id,
                ProtocolEvent::PairSuccess(crate::protocol::events::PairSuccessInfo {
                    jid: "551199@s.whatsapp.net".into(),
                    platform: None,
                    business_name: None,
                }),
            )
            .await;
        adapter.push_event(&view.session.id, ProtocolEvent::Connected).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fetched = store.get_session_by_id(&view.session.id).unwrap();
        assert!(fetched.is_connected);

        let (_session, message) = facade.connect(&view.session.id).await.unwrap();
        assert_eq!(message.as_deref(), Some("already connected"));
    }

    #[tokio::test]
    async fn pair_phone_normalizes_and_rejects_non_digits() {
        assert_eq!(LifecycleFacade::normalize_phone("+55 11 9999 9999").unwrap(), "5511999999999");
        assert!(LifecycleFacade::normalize_phone("abc").is_err());
    }

    #[tokio::test]
    async fn delete_missing_session_is_not_found() {
        let (facade, _store, _adapter) = build().await;
        let err = facade.delete("missing-id").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_reflects_store_state() {
        let (facade, store, _adapter) = build().await;
        facade.create("carol".into(), None).await.unwrap();
        facade.create("dana".into(), None).await.unwrap();
        let views = facade.list(&store, 10, 0).unwrap();
        assert_eq!(views.len(), 2);
        let counts = facade.counts(&store).unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.disconnected, 2);
    }

    #[tokio::test]
    async fn get_reconciles_row_from_live_adapter_status() {
        let (facade, store, adapter) = build().await;
        let view = facade.create("erin".into(), None).await.unwrap();
        facade.connect(&view.session.id).await.unwrap();

        // Simulate the adapter already reporting a connected device even
        // though no `Connected` event has travelled through the runner yet.
        adapter.set_status(
            &view.session.id,
            crate::protocol::AdapterStatus {
                connected: true,
                device_jid: Some("551199@s.whatsapp.net".into()),
                ..Default::default()
            },
        );

        let reconciled = facade.get(&view.session.id, &store).await.unwrap();
        assert!(reconciled.session.is_connected);
        assert_eq!(reconciled.session.device_jid.as_deref(), Some("551199@s.whatsapp.net"));
    }
}
