// ── Protocol Adapter: HTTP Bridge Implementation ────────────────────────────
// Production `ProtocolAdapter` that drives an external, embedded WhatsApp
// protocol process over HTTP — the same shape as the teacher's
// `whatsapp/evolution_api.rs` (a sidecar container with a `/instance/*` and
// `/message/*` REST surface, addressed with an `apikey` header and one
// "instance" per tenant) generalised from the teacher's single global
// instance to one instance per session id.
//
// Inbound events: the sidecar POSTs webhooks back to a local listener,
// exactly as `whatsapp/webhook.rs` runs a raw `tokio::net::TcpListener` with
// no framework — reused here, demultiplexing by the `instanceName` /
// `sessionId` field in the POST body into each session's channel.

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::adapter::{AdapterStatus, ProtocolAdapter};
use super::events::ProtocolEvent;

#[derive(Debug, Clone)]
pub struct HttpBridgeConfig {
    /// Base URL of the embedded protocol sidecar, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub api_key: String,
    /// Local address this process listens on for the sidecar's webhooks.
    pub webhook_bind: String,
    pub webhook_port: u16,
}

struct SessionChannel {
    sender: mpsc::Sender<ProtocolEvent>,
    receiver: Option<mpsc::Receiver<ProtocolEvent>>,
}

pub struct HttpBridgeAdapter {
    config: HttpBridgeConfig,
    client: reqwest::Client,
    channels: Mutex<HashMap<SessionId, SessionChannel>>,
    channel_capacity: usize,
    listener_started: AtomicBool,
}

impl HttpBridgeAdapter {
    pub fn new(config: HttpBridgeConfig) -> Self {
        HttpBridgeAdapter {
            config,
            client: reqwest::Client::new(),
            channels: Mutex::new(HashMap::new()),
            channel_capacity: 32,
            listener_started: AtomicBool::new(false),
        }
    }

    fn instance_url(&self, path: &str, id: &SessionId) -> String {
        format!("{}/{}/{}", self.config.base_url, path, id)
    }

    async fn sender_for(&self, id: &SessionId) -> GatewayResult<mpsc::Sender<ProtocolEvent>> {
        let channels = self.channels.lock();
        channels
            .get(id)
            .map(|c| c.sender.clone())
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))
    }

    /// Start the inbound webhook listener once per process. Idempotent —
    /// safe to call from every `Registry::acquire` since only the first
    /// caller actually binds the socket.
    pub fn ensure_webhook_listener(self: &Arc<Self>) {
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_webhook_listener().await {
                warn!(error = %e, "protocol adapter webhook listener exited");
            }
        });
    }

    async fn run_webhook_listener(self: Arc<Self>) -> GatewayResult<()> {
        let addr = format!("{}:{}", self.config.webhook_bind, self.config.webhook_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "protocol adapter webhook listener bound");

        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "webhook accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(&mut stream).await {
                    warn!(%peer, error = %e, "webhook request failed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: &mut tokio::net::TcpStream) -> GatewayResult<()> {
        let mut buf = vec![0u8; 65536];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let raw = String::from_utf8_lossy(&buf[..n]).to_string();
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or("");

        let result = self.dispatch_webhook_body(body).await;
        let (status, msg) = match &result {
            Ok(()) => (200, "ok"),
            Err(_) => (400, "bad request"),
        };
        let resp_body = json!({ "ok": result.is_ok(), "message": msg }).to_string();
        let resp = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            resp_body.len(),
            resp_body
        );
        stream.write_all(resp.as_bytes()).await?;
        Ok(())
    }

    async fn dispatch_webhook_body(&self, body: &str) -> GatewayResult<()> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| GatewayError::invalid_input(format!("malformed webhook body: {e}")))?;
        let session_id = value
            .get("sessionId")
            .or_else(|| value.get("instanceName"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::invalid_input("webhook body missing sessionId"))?
            .to_string();
        let event = parse_sidecar_event(&value)
            .ok_or_else(|| GatewayError::invalid_input("unrecognised webhook event shape"))?;

        let sender = self.sender_for(&session_id).await?;
        sender
            .send(event)
            .await
            .map_err(|_| GatewayError::Transient("event receiver closed".into()))
    }
}

/// Translate the sidecar's wire event shape into our `ProtocolEvent` union.
/// The sidecar's own JSON schema is an external contract (§1); this maps its
/// `"event"` tag to ours.
fn parse_sidecar_event(value: &serde_json::Value) -> Option<ProtocolEvent> {
    let kind = value.get("event").and_then(|v| v.as_str())?;
    let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
    Some(match kind {
        "connection.open" => ProtocolEvent::Connected,
        "connection.close" => ProtocolEvent::Disconnected,
        "connection.logged_out" => ProtocolEvent::LoggedOut {
            reason: data.get("reason").and_then(|v| v.as_str()).unwrap_or("logged out").into(),
        },
        "connection.failure" => ProtocolEvent::ConnectFailure {
            detail: data.get("detail").and_then(|v| v.as_str()).unwrap_or("connect failure").into(),
        },
        "qrcode.updated" => ProtocolEvent::QrCodeEmitted {
            code: data.get("code").and_then(|v| v.as_str()).unwrap_or_default().into(),
        },
        "pairing.success" => ProtocolEvent::PairSuccess(super::events::PairSuccessInfo {
            jid: data.get("jid").and_then(|v| v.as_str()).unwrap_or_default().into(),
            platform: data.get("platform").and_then(|v| v.as_str()).map(String::from),
            business_name: data.get("businessName").and_then(|v| v.as_str()).map(String::from),
        }),
        "messages.upsert" => ProtocolEvent::Message {
            info: super::events::MessageInfo {
                id: data.get("id").and_then(|v| v.as_str()).unwrap_or_default().into(),
                from: data.get("from").and_then(|v| v.as_str()).unwrap_or_default().into(),
                push_name: data.get("pushName").and_then(|v| v.as_str()).map(String::from),
                timestamp: Utc::now(),
            },
            payload: data,
        },
        "messages.receipt" => ProtocolEvent::Receipt { payload: data },
        "presence.update" => ProtocolEvent::Presence { payload: data },
        "chat.presence" => ProtocolEvent::ChatPresence { payload: data },
        "history.sync" => ProtocolEvent::HistorySync {
            sync_type: data.get("syncType").and_then(|v| v.as_str()).unwrap_or_default().into(),
            conversation_count: data.get("conversationCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        },
        "app_state.sync_complete" => ProtocolEvent::AppStateSyncComplete,
        "group.info" => ProtocolEvent::GroupInfo { payload: data },
        "group.joined" => ProtocolEvent::JoinedGroup { payload: data },
        "push_name.setting" => ProtocolEvent::PushNameSetting {
            push_name: data.get("pushName").and_then(|v| v.as_str()).unwrap_or_default().into(),
        },
        "blocklist.change" => ProtocolEvent::BlocklistChange { payload: data },
        "offline_sync.preview" => ProtocolEvent::OfflineSyncPreview { payload: data },
        "stream.replaced" => ProtocolEvent::StreamReplaced,
        _ => return None,
    })
}

#[async_trait]
impl ProtocolAdapter for HttpBridgeAdapter {
    async fn create(&self, id: &SessionId) -> GatewayResult<()> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.channels.lock().insert(id.clone(), SessionChannel { sender: tx, receiver: Some(rx) });

        let url = format!("{}/instance/create", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({
                "instanceName": id,
                "webhook": format!(
                    "http://{}:{}/webhook", self.config.webhook_bind, self.config.webhook_port
                ),
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Transient(format!("instance create failed: {text}")));
        }
        Ok(())
    }

    async fn connect(&self, id: &SessionId) -> GatewayResult<()> {
        let url = self.instance_url("instance/connect", id);
        let resp = self.client.get(&url).header("apikey", &self.config.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Transient(format!("connect failed: {}", resp.status())));
        }
        Ok(())
    }

    async fn disconnect(&self, id: &SessionId) -> GatewayResult<()> {
        let url = self.instance_url("instance/logout", id);
        let _ = self.client.delete(&url).header("apikey", &self.config.api_key).send().await?;
        Ok(())
    }

    async fn logout(&self, id: &SessionId) -> GatewayResult<()> {
        self.disconnect(id).await
    }

    async fn delete(&self, id: &SessionId) -> GatewayResult<()> {
        let url = self.instance_url("instance/delete", id);
        let _ = self.client.delete(&url).header("apikey", &self.config.api_key).send().await?;
        self.channels.lock().remove(id);
        Ok(())
    }

    async fn get_qr_code(&self, id: &SessionId) -> GatewayResult<(String, DateTime<Utc>)> {
        let url = self.instance_url("instance/qrcode", id);
        let resp = self.client.get(&url).header("apikey", &self.config.api_key).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::QrExpired);
        }
        let body: serde_json::Value = resp.json().await?;
        let code = body.get("code").and_then(|v| v.as_str()).ok_or(GatewayError::QrExpired)?;
        let expires_at = body
            .get("expiresAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(120));
        Ok((code.to_string(), expires_at))
    }

    async fn pair_phone(&self, id: &SessionId, e164_digits: &str) -> GatewayResult<String> {
        let url = self.instance_url("instance/pair", id);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({ "phoneNumber": e164_digits }))
            .send()
            .await?;
        let body: serde_json::Value = resp.json().await?;
        body.get("code")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| GatewayError::Transient("pairing code missing in response".into()))
    }

    async fn send_text(&self, id: &SessionId, to: &str, text: &str) -> GatewayResult<String> {
        let url = self.instance_url("message/sendText", id);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({ "to": to, "text": text }))
            .send()
            .await?;
        extract_message_id(resp).await
    }

    async fn send_media(
        &self,
        id: &SessionId,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> GatewayResult<String> {
        let url = self.instance_url("message/sendMedia", id);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({ "to": to, "mediaUrl": media_url, "caption": caption }))
            .send()
            .await?;
        extract_message_id(resp).await
    }

    async fn send_location(
        &self,
        id: &SessionId,
        to: &str,
        latitude: f64,
        longitude: f64,
    ) -> GatewayResult<String> {
        let url = self.instance_url("message/sendLocation", id);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({ "to": to, "latitude": latitude, "longitude": longitude }))
            .send()
            .await?;
        extract_message_id(resp).await
    }

    async fn send_contact(
        &self,
        id: &SessionId,
        to: &str,
        contact_jid: &str,
        display_name: &str,
    ) -> GatewayResult<String> {
        let url = self.instance_url("message/sendContact", id);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&json!({ "to": to, "contactJid": contact_jid, "displayName": display_name }))
            .send()
            .await?;
        extract_message_id(resp).await
    }

    async fn status(&self, id: &SessionId) -> GatewayResult<AdapterStatus> {
        let url = self.instance_url("instance/status", id);
        let resp = self.client.get(&url).header("apikey", &self.config.api_key).send().await?;
        if !resp.status().is_success() {
            return Ok(AdapterStatus::default());
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(AdapterStatus {
            connected: body.get("connected").and_then(|v| v.as_bool()).unwrap_or(false),
            logged_in: body.get("loggedIn").and_then(|v| v.as_bool()).unwrap_or(false),
            device_jid: body.get("deviceJid").and_then(|v| v.as_str()).map(String::from),
            push_name: body.get("pushName").and_then(|v| v.as_str()).map(String::from),
            connected_at: body
                .get("connectedAt")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            last_seen: body
                .get("lastSeen")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }

    fn take_event_receiver(&self, id: &SessionId) -> Option<mpsc::Receiver<ProtocolEvent>> {
        let mut channels = self.channels.lock();
        channels.get_mut(id).and_then(|c| c.receiver.take())
    }
}

async fn extract_message_id(resp: reqwest::Response) -> GatewayResult<String> {
    if !resp.status().is_success() {
        return Err(GatewayError::Transient(format!("send failed: {}", resp.status())));
    }
    let body: serde_json::Value = resp.json().await?;
    Ok(body
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_event_kinds() {
        let v = json!({ "sessionId": "s1", "event": "connection.open", "data": {} });
        assert!(matches!(parse_sidecar_event(&v), Some(ProtocolEvent::Connected)));

        let v = json!({ "sessionId": "s1", "event": "qrcode.updated", "data": { "code": "2@abc" } });
        match parse_sidecar_event(&v) {
            Some(ProtocolEvent::QrCodeEmitted { code }) => assert_eq!(code, "2@abc"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_returns_none() {
        let v = json!({ "sessionId": "s1", "event": "something.unknown" });
        assert!(parse_sidecar_event(&v).is_none());
    }
}
