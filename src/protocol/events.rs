// ── Protocol Adapter: Raw Event Stream (§4.2) ───────────────────────────────
// The tagged union the embedded WhatsApp protocol library emits per session.
// The SessionRunner is the sole reader of this stream (§4.3 R1, §9 "dynamic
// event dispatch → typed variants": an explicit table, not reflection).

use serde::{Deserialize, Serialize};

/// One message envelope as handed up from the protocol layer. Payload is
/// left as an opaque JSON blob — decoding WhatsApp's wire format is the
/// embedded protocol library's job, out of scope for this core (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub from: String,
    pub push_name: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSuccessInfo {
    pub jid: String,
    pub platform: Option<String>,
    pub business_name: Option<String>,
}

/// One variant per raw event kind §4.2 enumerates. `sessionId` is carried by
/// the channel itself (one channel per session, §4.2), not by the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolEvent {
    Connected,
    Disconnected,
    LoggedOut { reason: String },
    ConnectFailure { detail: String },
    PairSuccess(PairSuccessInfo),
    QrCodeEmitted { code: String },
    Message { info: MessageInfo, payload: serde_json::Value },
    Receipt { payload: serde_json::Value },
    Presence { payload: serde_json::Value },
    ChatPresence { payload: serde_json::Value },
    HistorySync { sync_type: String, conversation_count: u32 },
    AppStateSyncComplete,
    GroupInfo { payload: serde_json::Value },
    JoinedGroup { payload: serde_json::Value },
    PushNameSetting { push_name: String },
    BlocklistChange { payload: serde_json::Value },
    OfflineSyncPreview { payload: serde_json::Value },
    StreamReplaced,
}

impl ProtocolEvent {
    /// Short tag used in logging; not the same as `DomainEventType` (only
    /// some raw events become dispatchable domain events — see
    /// `dispatcher::translate`).
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Connected => "connected",
            ProtocolEvent::Disconnected => "disconnected",
            ProtocolEvent::LoggedOut { .. } => "logged_out",
            ProtocolEvent::ConnectFailure { .. } => "connect_failure",
            ProtocolEvent::PairSuccess(_) => "pair_success",
            ProtocolEvent::QrCodeEmitted { .. } => "qrcode_emitted",
            ProtocolEvent::Message { .. } => "message",
            ProtocolEvent::Receipt { .. } => "receipt",
            ProtocolEvent::Presence { .. } => "presence",
            ProtocolEvent::ChatPresence { .. } => "chat_presence",
            ProtocolEvent::HistorySync { .. } => "history_sync",
            ProtocolEvent::AppStateSyncComplete => "app_state_sync_complete",
            ProtocolEvent::GroupInfo { .. } => "group_info",
            ProtocolEvent::JoinedGroup { .. } => "joined_group",
            ProtocolEvent::PushNameSetting { .. } => "push_name_setting",
            ProtocolEvent::BlocklistChange { .. } => "blocklist_change",
            ProtocolEvent::OfflineSyncPreview { .. } => "offline_sync_preview",
            ProtocolEvent::StreamReplaced => "stream_replaced",
        }
    }
}
