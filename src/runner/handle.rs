// ── SessionRunner: External Handle (§4.3, §4.4) ─────────────────────────────
// What the Registry and Facade hold instead of the runner itself. Sending a
// command suspends until the bounded mailbox accepts it or the caller's
// deadline elapses (§5 "Command dispatch to a SessionRunner suspends until
// the runner accepts").

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{QrCodeArtifact, Session, SessionId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::command::{LifecycleReply, RunnerCommand};

/// A live reference to a spawned `SessionRunner` actor. Cloning shares the
/// same mailbox — multiple HTTP handlers may hold a handle to the same
/// runner concurrently (§5: many tasks, one mailbox).
#[derive(Clone)]
pub struct RunnerHandle {
    id: SessionId,
    tx: mpsc::Sender<RunnerCommand>,
}

impl RunnerHandle {
    pub(super) fn new(id: SessionId, tx: mpsc::Sender<RunnerCommand>) -> Self {
        RunnerHandle { id, tx }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// True once the runner's command loop has exited (mailbox closed).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send<T>(
        &self,
        timeout: Duration,
        make: impl FnOnce(oneshot::Sender<GatewayResult<T>>) -> RunnerCommand,
    ) -> GatewayResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = make(reply_tx);
        let name = cmd.name();

        match tokio::time::timeout(timeout, self.tx.send(cmd)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(GatewayError::not_found(format!("session {} ({name})", self.id))),
            Err(_) => return Err(GatewayError::Busy),
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Fatal(format!("runner dropped reply for {name}"))),
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    pub async fn connect(&self, timeout: Duration) -> GatewayResult<LifecycleReply> {
        self.send(timeout, RunnerCommand::Connect).await
    }

    pub async fn disconnect(&self, timeout: Duration) -> GatewayResult<LifecycleReply> {
        self.send(timeout, RunnerCommand::Disconnect).await
    }

    pub async fn logout(&self, timeout: Duration) -> GatewayResult<LifecycleReply> {
        self.send(timeout, RunnerCommand::Logout).await
    }

    pub async fn delete(&self, timeout: Duration) -> GatewayResult<()> {
        self.send(timeout, RunnerCommand::Delete).await
    }

    pub async fn get_qr(&self, timeout: Duration) -> GatewayResult<QrCodeArtifact> {
        self.send(timeout, RunnerCommand::GetQr).await
    }

    pub async fn pair_phone(&self, e164_digits: String, timeout: Duration) -> GatewayResult<String> {
        self.send(timeout, |reply| RunnerCommand::PairPhone { e164_digits, reply }).await
    }

    pub async fn get_status(&self, timeout: Duration) -> GatewayResult<Session> {
        self.send(timeout, RunnerCommand::GetStatus).await
    }

    pub async fn send_text(&self, to: String, text: String, timeout: Duration) -> GatewayResult<String> {
        self.send(timeout, |reply| RunnerCommand::SendText { to, text, reply }).await
    }

    pub async fn send_media(
        &self,
        to: String,
        media_url: String,
        caption: Option<String>,
        timeout: Duration,
    ) -> GatewayResult<String> {
        self.send(timeout, |reply| RunnerCommand::SendMedia { to, media_url, caption, reply }).await
    }

    pub async fn send_location(
        &self,
        to: String,
        latitude: f64,
        longitude: f64,
        timeout: Duration,
    ) -> GatewayResult<String> {
        self.send(timeout, |reply| RunnerCommand::SendLocation { to, latitude, longitude, reply }).await
    }

    pub async fn send_contact(
        &self,
        to: String,
        contact_jid: String,
        display_name: String,
        timeout: Duration,
    ) -> GatewayResult<String> {
        self.send(timeout, |reply| RunnerCommand::SendContact { to, contact_jid, display_name, reply }).await
    }
}
