// ── Protocol Adapter: In-Process Test Double ────────────────────────────────
// A fully in-memory `ProtocolAdapter` used by the integration test suite (and
// available to any embedder that wants to exercise the lifecycle engine
// without a live WhatsApp bridge). Test code drives it directly — call
// `push_event` to simulate what the embedded protocol library would emit,
// and inspect `calls()` to assert which adapter methods the runner invoked.

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

use super::adapter::{AdapterStatus, ProtocolAdapter};
use super::events::ProtocolEvent;

struct SessionState {
    sender: mpsc::Sender<ProtocolEvent>,
    receiver: Option<mpsc::Receiver<ProtocolEvent>>,
    status: AdapterStatus,
    qr: Option<(String, DateTime<Utc>)>,
    deleted: bool,
}

/// Test/reference double for `ProtocolAdapter`. Channel capacity mirrors the
/// runner's mailbox default (see `GatewayConfig::runner_mailbox_capacity`).
pub struct FakeProtocolAdapter {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    calls: Mutex<Vec<String>>,
    channel_capacity: usize,
}

impl FakeProtocolAdapter {
    pub fn new() -> Self {
        FakeProtocolAdapter {
            sessions: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            channel_capacity: 32,
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Ordered log of adapter method invocations, e.g. `"connect:s1"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Directly overwrite the in-memory status snapshot `status(id)`
    /// returns, without pushing a protocol event through the runner — lets
    /// tests simulate the adapter's view of a session drifting ahead of
    /// what the store/runner currently have on file.
    pub fn set_status(&self, id: &SessionId, status: AdapterStatus) {
        let mut sessions = self.sessions.lock();
        if let Some(s) = sessions.get_mut(id) {
            s.status = status;
        }
    }

    /// Simulate the protocol library emitting an event for `id`. Panics if
    /// `create` was never called for this id (programmer error in a test).
    pub async fn push_event(&self, id: &SessionId, event: ProtocolEvent) {
        let sender = {
            let sessions = self.sessions.lock();
            sessions
                .get(id)
                .unwrap_or_else(|| panic!("push_event: session {id} was never created"))
                .sender
                .clone()
        };
        sender.send(event).await.expect("event receiver dropped");
    }
}

impl Default for FakeProtocolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for FakeProtocolAdapter {
    async fn create(&self, id: &SessionId) -> GatewayResult<()> {
        self.record(format!("create:{id}"));
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.sessions.lock().insert(
            id.clone(),
            SessionState {
                sender: tx,
                receiver: Some(rx),
                status: AdapterStatus::default(),
                qr: None,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn connect(&self, id: &SessionId) -> GatewayResult<()> {
        self.record(format!("connect:{id}"));
        let mut sessions = self.sessions.lock();
        let s = sessions
            .get_mut(id)
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))?;
        if s.status.connected {
            return Err(GatewayError::AlreadyConnected);
        }
        Ok(())
    }

    async fn disconnect(&self, id: &SessionId) -> GatewayResult<()> {
        self.record(format!("disconnect:{id}"));
        let mut sessions = self.sessions.lock();
        if let Some(s) = sessions.get_mut(id) {
            s.status.connected = false;
        }
        Ok(())
    }

    async fn logout(&self, id: &SessionId) -> GatewayResult<()> {
        self.record(format!("logout:{id}"));
        let mut sessions = self.sessions.lock();
        if let Some(s) = sessions.get_mut(id) {
            s.status = AdapterStatus::default();
        }
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> GatewayResult<()> {
        self.record(format!("delete:{id}"));
        let mut sessions = self.sessions.lock();
        if let Some(s) = sessions.get_mut(id) {
            s.deleted = true;
        }
        Ok(())
    }

    async fn get_qr_code(&self, id: &SessionId) -> GatewayResult<(String, DateTime<Utc>)> {
        self.record(format!("get_qr_code:{id}"));
        let sessions = self.sessions.lock();
        let s = sessions
            .get(id)
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))?;
        match &s.qr {
            Some((code, exp)) if *exp > Utc::now() => Ok((code.clone(), *exp)),
            _ => Err(GatewayError::QrExpired),
        }
    }

    async fn pair_phone(&self, id: &SessionId, e164_digits: &str) -> GatewayResult<String> {
        self.record(format!("pair_phone:{id}:{e164_digits}"));
        Ok(format!("{:08}", (e164_digits.len() as u32 * 7919) % 100_000_000))
    }

    async fn send_text(&self, id: &SessionId, to: &str, _text: &str) -> GatewayResult<String> {
        self.record(format!("send_text:{id}:{to}"));
        let sessions = self.sessions.lock();
        let s = sessions
            .get(id)
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))?;
        if !s.status.connected {
            return Err(GatewayError::invalid_state("not connected"));
        }
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn send_media(
        &self,
        id: &SessionId,
        to: &str,
        _media_url: &str,
        _caption: Option<&str>,
    ) -> GatewayResult<String> {
        self.record(format!("send_media:{id}:{to}"));
        self.send_text(id, to, "").await
    }

    async fn send_location(
        &self,
        id: &SessionId,
        to: &str,
        _latitude: f64,
        _longitude: f64,
    ) -> GatewayResult<String> {
        self.record(format!("send_location:{id}:{to}"));
        self.send_text(id, to, "").await
    }

    async fn send_contact(
        &self,
        id: &SessionId,
        to: &str,
        _contact_jid: &str,
        _display_name: &str,
    ) -> GatewayResult<String> {
        self.record(format!("send_contact:{id}:{to}"));
        self.send_text(id, to, "").await
    }

    async fn status(&self, id: &SessionId) -> GatewayResult<AdapterStatus> {
        let sessions = self.sessions.lock();
        sessions
            .get(id)
            .map(|s| s.status.clone())
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))
    }

    fn take_event_receiver(&self, id: &SessionId) -> Option<mpsc::Receiver<ProtocolEvent>> {
        let mut sessions = self.sessions.lock();
        sessions.get_mut(id).and_then(|s| s.receiver.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_take_receiver_once() {
        let adapter = FakeProtocolAdapter::new();
        adapter.create(&"s1".to_string()).await.unwrap();
        assert!(adapter.take_event_receiver(&"s1".to_string()).is_some());
        assert!(adapter.take_event_receiver(&"s1".to_string()).is_none());
    }

    #[tokio::test]
    async fn push_event_delivers_to_receiver() {
        let adapter = FakeProtocolAdapter::new();
        let id = "s1".to_string();
        adapter.create(&id).await.unwrap();
        let mut rx = adapter.take_event_receiver(&id).unwrap();
        adapter.push_event(&id, ProtocolEvent::Connected).await;
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, ProtocolEvent::Connected));
    }

    #[tokio::test]
    async fn connect_twice_signals_already_connected() {
        let adapter = FakeProtocolAdapter::new();
        let id = "s1".to_string();
        adapter.create(&id).await.unwrap();
        adapter.connect(&id).await.unwrap();
        {
            let mut sessions = adapter.sessions.lock();
            sessions.get_mut(&id).unwrap().status.connected = true;
        }
        let err = adapter.connect(&id).await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyConnected));
    }

    #[tokio::test]
    async fn send_text_requires_connected() {
        let adapter = FakeProtocolAdapter::new();
        let id = "s1".to_string();
        adapter.create(&id).await.unwrap();
        let err = adapter.send_text(&id, "123@s.whatsapp.net", "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState(_)));
    }
}
