// ── Session Registry (C3) ───────────────────────────────────────────────────
// Keeps at most one live `SessionRunner` per session id (R1) and guarantees a
// stopped runner is never handed back out (R2) — a fresh `acquire` always
// starts a new one. Generalised from the teacher's `McpRegistry`
// (`HashMap<String, McpClient>` behind a `tokio::sync::Mutex`, with
// `connect`/`disconnect`/`disconnect_all` driving the map) to
// `HashMap<SessionId, RunnerTask>`.

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{Session, SessionId};
use crate::config::GatewayConfig;
use crate::dispatcher::EventDispatcher;
use crate::protocol::ProtocolAdapter;
use crate::runner::{RunnerHandle, SessionRunner};
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct RunnerEntry {
    handle: RunnerHandle,
    join: JoinHandle<()>,
}

/// Owns the live runner map. Shared via `Arc` by the Facade and (if present)
/// inbound-event routing.
pub struct SessionRegistry {
    store: Arc<SessionStore>,
    adapter: Arc<dyn ProtocolAdapter>,
    dispatcher: Arc<EventDispatcher>,
    qr_ttl: Duration,
    mailbox_capacity: usize,
    runners: Mutex<HashMap<SessionId, RunnerEntry>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<SessionStore>,
        adapter: Arc<dyn ProtocolAdapter>,
        dispatcher: Arc<EventDispatcher>,
        config: &GatewayConfig,
    ) -> Self {
        SessionRegistry {
            store,
            adapter,
            dispatcher,
            qr_ttl: config.qr_ttl,
            mailbox_capacity: config.runner_mailbox_capacity,
            runners: Mutex::new(HashMap::new()),
        }
    }

    /// Return a handle to the running session's actor, spawning one if none
    /// is live (R1: at most one runner per id; R2: a closed handle left
    /// behind by a stopped runner is replaced, never reused). Registers a
    /// fresh protocol-adapter instance for sessions spawned for the first
    /// time since process start.
    pub async fn acquire(&self, id: &SessionId) -> GatewayResult<RunnerHandle> {
        let mut runners = self.runners.lock().await;

        if let Some(entry) = runners.get(id) {
            if !entry.handle.is_closed() {
                return Ok(entry.handle.clone());
            }
            debug!(session_id = %id, "stale runner entry found, respawning");
            runners.remove(id);
        }

        let session = self.store.get_session_by_id(id)?;
        let events = match self.adapter.take_event_receiver(id) {
            Some(rx) => rx,
            None => {
                self.adapter.create(id).await?;
                self.adapter
                    .take_event_receiver(id)
                    .ok_or_else(|| GatewayError::Fatal(format!("adapter did not register a channel for {id}")))?
            }
        };

        let (handle, join) = SessionRunner::spawn(
            session,
            self.store.clone(),
            self.adapter.clone(),
            self.dispatcher.clone(),
            self.qr_ttl,
            self.mailbox_capacity,
            events,
        );
        runners.insert(id.clone(), RunnerEntry { handle: handle.clone(), join });
        info!(session_id = %id, "runner acquired");
        Ok(handle)
    }

    /// Register a brand-new session: persist the row, allocate the protocol
    /// instance, and spawn its runner immediately so it's ready to accept a
    /// `Connect` without the caller racing a second `acquire`.
    pub async fn create(&self, session: Session) -> GatewayResult<RunnerHandle> {
        self.store.create_session(&session)?;
        self.adapter.create(&session.id).await?;
        self.acquire(&session.id).await
    }

    /// Drop the registry's reference to a runner without stopping it —
    /// used after a `Delete` command, where the runner stops itself and the
    /// registry only needs to forget the now-dead entry.
    pub async fn forget(&self, id: &SessionId) {
        let mut runners = self.runners.lock().await;
        if let Some(entry) = runners.remove(id) {
            entry.join.abort();
        }
    }

    /// True if a runner is currently live for `id`.
    pub async fn is_live(&self, id: &SessionId) -> bool {
        let runners = self.runners.lock().await;
        runners.get(id).is_some_and(|e| !e.handle.is_closed())
    }

    pub async fn live_ids(&self) -> Vec<SessionId> {
        let runners = self.runners.lock().await;
        runners
            .iter()
            .filter(|(_, e)| !e.handle.is_closed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Query the protocol adapter's own status snapshot directly, bypassing
    /// the runner's mailbox entirely (§4.7: "for live status they may
    /// additionally query `Adapter.status(id)`"). Used by the Facade's
    /// `Get` bypass path to reconcile the store opportunistically.
    pub async fn adapter_status(&self, id: &SessionId) -> GatewayResult<crate::protocol::AdapterStatus> {
        self.adapter.status(id).await
    }

    /// Stop every live runner by issuing a `Delete`-free graceful
    /// disconnect-and-drop — used on process shutdown (§6 "graceful
    /// shutdown"), mirroring the teacher's `McpRegistry::disconnect_all`.
    pub async fn shutdown_all(&self, per_runner_timeout: Duration) {
        let ids: Vec<SessionId> = {
            let runners = self.runners.lock().await;
            runners.keys().cloned().collect()
        };
        for id in ids {
            let handle = {
                let runners = self.runners.lock().await;
                runners.get(&id).map(|e| e.handle.clone())
            };
            if let Some(handle) = handle {
                let _ = handle.disconnect(per_runner_timeout).await;
            }
        }
        let mut runners = self.runners.lock().await;
        for (_, entry) in runners.drain() {
            entry.join.abort();
        }
        info!("all session runners stopped");
    }
}
