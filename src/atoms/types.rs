// ── Gateway Atoms: Data Model ───────────────────────────────────────────────
// Types shared across the store, protocol adapter, runner, dispatcher and
// facade layers. Mirrors the Session / WebhookConfig / QRCodeArtifact /
// DomainEvent / WebhookDelivery shapes from the data model.
//
// Session rows carry only the fields needed to *derive* status (I2/I3);
// `status` itself is never stored, only computed — see `Session::status()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = String;

/// A session's lifecycle state, always derived from `Session`'s stored
/// fields, never itself persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrCode,
    Connected,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::QrCode => "qrcode",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Validates §4.7 "valid proxy config": port in [1, 65535] (guaranteed
    /// by the `u16` type itself, so only 0 is rejected), non-empty host.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("proxy host must not be empty".into());
        }
        if self.port == 0 {
            return Err("proxy port must be in 1..=65535".into());
        }
        Ok(())
    }
}

/// Durable session row (§3 Session). `status` is intentionally absent —
/// call `.status()` to derive it from the persisted fields (I2/I3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub device_jid: Option<String>,
    pub is_connected: bool,
    pub connection_error: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_expires_at: Option<DateTime<Utc>>,
    pub proxy_config: Option<ProxyConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            device_jid: None,
            is_connected: false,
            connection_error: None,
            qr_code: None,
            qr_code_expires_at: None,
            proxy_config: None,
            created_at: now,
            updated_at: now,
            connected_at: None,
            last_seen: None,
        }
    }

    /// Derive the session's lifecycle status from its persisted fields.
    /// `Connected` iff `is_connected`; else `QrCode` iff a QR is present and
    /// unexpired; else `Error` iff a connection error is recorded; else
    /// `Disconnected`.
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.is_connected {
            return SessionStatus::Connected;
        }
        if let Some(expires) = self.qr_code_expires_at {
            if self.qr_code.is_some() && expires > now {
                return SessionStatus::QrCode;
            }
        }
        if self.connection_error.is_some() {
            return SessionStatus::Error;
        }
        SessionStatus::Disconnected
    }

    /// I2: `is_connected=true` implies `device_jid` non-empty and `qr_code`
    /// empty. I3: `qr_code` non-empty implies `qr_code_expires_at` in the
    /// future at the moment of write. Checked in debug builds and by tests;
    /// store methods are written so these can never be violated in practice.
    pub fn check_invariants(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.is_connected {
            if self.device_jid.as_deref().unwrap_or("").is_empty() {
                return Err("I2 violated: is_connected=true but device_jid is empty".into());
            }
            if self.qr_code.is_some() {
                return Err("I2 violated: is_connected=true but qr_code is set".into());
            }
        }
        if self.qr_code.is_some() {
            match self.qr_code_expires_at {
                Some(exp) if exp > now => {}
                _ => return Err("I3 violated: qr_code set without a future expiry".into()),
            }
        }
        Ok(())
    }
}

/// Durable webhook subscription, 0..1 per session (§3 WebhookConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub session_id: SessionId,
    pub url: String,
    pub secret: Option<String>,
    pub enabled: bool,
    /// Empty set means "all event types" (§3).
    pub events: Vec<DomainEventType>,
}

impl WebhookConfig {
    /// §4.5 step 3: "If `events` is non-empty and does not contain the event
    /// type, drops."
    pub fn subscribes_to(&self, ty: DomainEventType) -> bool {
        self.events.is_empty() || self.events.contains(&ty)
    }
}

/// Transient QR artifact, mirrored onto the session row while live (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeArtifact {
    pub raw_code: String,
    pub image_base64: String,
    pub expires_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Event type tags, used both on `DomainEvent` and in `WebhookConfig.events`
/// subscription filters (§3, §6 GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventType {
    Message,
    ReadReceipt,
    Presence,
    ChatPresence,
    HistorySync,
    GroupInfo,
    JoinedGroup,
    Connected,
    Disconnected,
    QrCode,
    PairSuccess,
    LoggedOut,
    ConnectFailure,
}

impl std::fmt::Display for DomainEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DomainEventType::Message => "message",
            DomainEventType::ReadReceipt => "read_receipt",
            DomainEventType::Presence => "presence",
            DomainEventType::ChatPresence => "chat_presence",
            DomainEventType::HistorySync => "history_sync",
            DomainEventType::GroupInfo => "group_info",
            DomainEventType::JoinedGroup => "joined_group",
            DomainEventType::Connected => "connected",
            DomainEventType::Disconnected => "disconnected",
            DomainEventType::QrCode => "qrcode",
            DomainEventType::PairSuccess => "pair_success",
            DomainEventType::LoggedOut => "logged_out",
            DomainEventType::ConnectFailure => "connect_failure",
        };
        f.write_str(s)
    }
}

/// A typed, session-scoped domain event (§3 DomainEvent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: DomainEventType,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl DomainEvent {
    pub fn new(session_id: impl Into<String>, event_type: DomainEventType, data: serde_json::Value) -> Self {
        DomainEvent {
            id: Uuid::new_v4().to_string(),
            event_type,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// One outbound delivery attempt record (§3 WebhookDelivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub session_id: SessionId,
    pub event: DomainEvent,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_status: Option<u16>,
}

impl WebhookDelivery {
    pub fn new(session_id: impl Into<String>, event: DomainEvent) -> Self {
        WebhookDelivery {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            event,
            attempt: 0,
            next_attempt_at: Utc::now(),
            last_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation_connected() {
        let mut s = Session::new("alice");
        s.is_connected = true;
        s.device_jid = Some("551199@s.whatsapp.net".into());
        assert_eq!(s.status(Utc::now()), SessionStatus::Connected);
    }

    #[test]
    fn status_derivation_qrcode_vs_expired() {
        let mut s = Session::new("bob");
        let now = Utc::now();
        s.qr_code = Some("2@abc".into());
        s.qr_code_expires_at = Some(now + chrono::Duration::seconds(120));
        assert_eq!(s.status(now), SessionStatus::QrCode);

        s.qr_code_expires_at = Some(now - chrono::Duration::seconds(1));
        assert_eq!(s.status(now), SessionStatus::Disconnected);
    }

    #[test]
    fn status_derivation_error_fallback() {
        let mut s = Session::new("carol");
        s.connection_error = Some("stream replaced".into());
        assert_eq!(s.status(Utc::now()), SessionStatus::Error);
    }

    #[test]
    fn invariant_i2_rejects_connected_without_jid() {
        let mut s = Session::new("dana");
        s.is_connected = true;
        assert!(s.check_invariants(Utc::now()).is_err());
    }

    #[test]
    fn invariant_i3_rejects_qr_without_future_expiry() {
        let mut s = Session::new("erin");
        s.qr_code = Some("code".into());
        s.qr_code_expires_at = None;
        assert!(s.check_invariants(Utc::now()).is_err());
    }

    #[test]
    fn webhook_empty_events_means_all() {
        let cfg = WebhookConfig {
            session_id: "s1".into(),
            url: "https://example.com/hook".into(),
            secret: None,
            enabled: true,
            events: vec![],
        };
        assert!(cfg.subscribes_to(DomainEventType::Message));
        assert!(cfg.subscribes_to(DomainEventType::Connected));
    }

    #[test]
    fn webhook_filters_by_event_set() {
        let cfg = WebhookConfig {
            session_id: "s1".into(),
            url: "https://example.com/hook".into(),
            secret: None,
            enabled: true,
            events: vec![DomainEventType::Message],
        };
        assert!(cfg.subscribes_to(DomainEventType::Message));
        assert!(!cfg.subscribes_to(DomainEventType::Connected));
    }

    #[test]
    fn proxy_config_validation() {
        let good = ProxyConfig {
            proxy_type: ProxyType::Socks5,
            host: "proxy.local".into(),
            port: 1080,
            username: None,
            password: None,
        };
        assert!(good.validate().is_ok());

        let bad = ProxyConfig {
            proxy_type: ProxyType::Http,
            host: "".into(),
            port: 8080,
            username: None,
            password: None,
        };
        assert!(bad.validate().is_err());
    }
}
