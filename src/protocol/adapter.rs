// ── Protocol Adapter (C2) ───────────────────────────────────────────────────
// Thin abstraction over the embedded WhatsApp protocol library (§4.2). The
// real wire-level stack is out of scope (§1) — only this contract is
// specified. One logical adapter instance exists per process; it tracks
// per-session state internally ("one object per session id").

use crate::atoms::error::GatewayResult;
use crate::atoms::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::events::ProtocolEvent;

/// Snapshot returned by `status(id)` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct AdapterStatus {
    pub connected: bool,
    pub logged_in: bool,
    pub device_jid: Option<String>,
    pub push_name: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// The operations the SessionRunner drives the protocol library through.
/// Every method may fail with `SessionNotFound`/`AlreadyConnected`/
/// `NotConnected`/`InvalidInput`/`QrExpired`/`Transient`-style
/// `GatewayError`s per §4.2 — callers are expected to classify via
/// `GatewayError::is_transient`/`is_idempotence_signal`.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Allocate a protocol instance for `id`, loading any persisted device
    /// credentials keyed by id/deviceJid. Registers the session's event
    /// channel; call `take_event_receiver` once afterwards to claim it.
    async fn create(&self, id: &SessionId) -> GatewayResult<()>;

    /// Initiate a connection attempt. Returns immediately — progress is
    /// reported via the event stream, not the return value.
    async fn connect(&self, id: &SessionId) -> GatewayResult<()>;

    async fn disconnect(&self, id: &SessionId) -> GatewayResult<()>;

    async fn logout(&self, id: &SessionId) -> GatewayResult<()>;

    /// Tear down the protocol-side instance entirely (credentials included).
    async fn delete(&self, id: &SessionId) -> GatewayResult<()>;

    /// Most recent valid raw QR code and its expiry. Fails `QrExpired` if
    /// none is current. Must never block longer than a short bounded
    /// interval (§4.2).
    async fn get_qr_code(&self, id: &SessionId) -> GatewayResult<(String, DateTime<Utc>)>;

    /// Request a phone-number linking code. `e164_digits` is expected
    /// pre-normalised to digits only by the caller (Facade).
    async fn pair_phone(&self, id: &SessionId, e164_digits: &str) -> GatewayResult<String>;

    async fn send_text(&self, id: &SessionId, to: &str, text: &str) -> GatewayResult<String>;

    async fn send_media(
        &self,
        id: &SessionId,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> GatewayResult<String>;

    async fn send_location(
        &self,
        id: &SessionId,
        to: &str,
        latitude: f64,
        longitude: f64,
    ) -> GatewayResult<String>;

    async fn send_contact(
        &self,
        id: &SessionId,
        to: &str,
        contact_jid: &str,
        display_name: &str,
    ) -> GatewayResult<String>;

    async fn status(&self, id: &SessionId) -> GatewayResult<AdapterStatus>;

    /// Claim the per-session event receiver registered by `create`. Returns
    /// `None` if already claimed or the session was never created — the
    /// Registry calls this exactly once per runner lifetime (§4.3).
    fn take_event_receiver(&self, id: &SessionId) -> Option<mpsc::Receiver<ProtocolEvent>>;
}
