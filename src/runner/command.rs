// ── SessionRunner: Command Mailbox Types (§4.4) ─────────────────────────────
// Request-reply messages the Facade (C7) sends to a SessionRunner. Each is
// handled to completion before the next is dequeued (§4.4: "the session
// state is never observed mid-transition by another command").

use crate::atoms::error::GatewayResult;
use crate::atoms::types::{QrCodeArtifact, Session};
use tokio::sync::oneshot;

/// Reply shared by the three connection-lifecycle commands: the resulting
/// session snapshot plus an optional informational message for idempotence
/// cases (§7: "connection-idempotence cases always return 200 with a
/// message stating the no-op").
#[derive(Debug, Clone)]
pub struct LifecycleReply {
    pub session: Session,
    pub message: Option<String>,
}

impl LifecycleReply {
    pub fn ok(session: Session) -> Self {
        LifecycleReply { session, message: None }
    }

    pub fn idempotent(session: Session, message: impl Into<String>) -> Self {
        LifecycleReply { session, message: Some(message.into()) }
    }
}

pub enum RunnerCommand {
    Connect(oneshot::Sender<GatewayResult<LifecycleReply>>),
    Disconnect(oneshot::Sender<GatewayResult<LifecycleReply>>),
    Logout(oneshot::Sender<GatewayResult<LifecycleReply>>),
    /// Terminal: on success the runner exits its loop immediately after
    /// replying (§4.4 "Any + Delete → terminal").
    Delete(oneshot::Sender<GatewayResult<()>>),
    GetQr(oneshot::Sender<GatewayResult<QrCodeArtifact>>),
    PairPhone {
        e164_digits: String,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
    GetStatus(oneshot::Sender<GatewayResult<Session>>),
    SendText {
        to: String,
        text: String,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
    SendMedia {
        to: String,
        media_url: String,
        caption: Option<String>,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
    SendLocation {
        to: String,
        latitude: f64,
        longitude: f64,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
    SendContact {
        to: String,
        contact_jid: String,
        display_name: String,
        reply: oneshot::Sender<GatewayResult<String>>,
    },
}

impl RunnerCommand {
    /// Name used in tracing spans and the `Busy`/`Cancelled` shutdown path.
    pub fn name(&self) -> &'static str {
        match self {
            RunnerCommand::Connect(_) => "connect",
            RunnerCommand::Disconnect(_) => "disconnect",
            RunnerCommand::Logout(_) => "logout",
            RunnerCommand::Delete(_) => "delete",
            RunnerCommand::GetQr(_) => "get_qr",
            RunnerCommand::PairPhone { .. } => "pair_phone",
            RunnerCommand::GetStatus(_) => "get_status",
            RunnerCommand::SendText { .. } => "send_text",
            RunnerCommand::SendMedia { .. } => "send_media",
            RunnerCommand::SendLocation { .. } => "send_location",
            RunnerCommand::SendContact { .. } => "send_contact",
        }
    }
}
