// ── Event Dispatcher (C5) ───────────────────────────────────────────────────
// Translates SessionRunner-produced domain events into webhook deliveries
// (§4.5). Runs synchronously inside the runner's event-handling path — all
// it does is a cached store lookup plus an enqueue, so it never becomes the
// bottleneck the runner's single-consumer loop would otherwise serialise on.

use crate::atoms::error::GatewayResult;
use crate::atoms::types::{DomainEvent, WebhookConfig, WebhookDelivery};
use crate::store::SessionStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct CacheEntry {
    config: Option<WebhookConfig>,
    fetched_at: Instant,
}

/// Looks up (and caches, §4.5 step 1: "cached per session with a short TTL")
/// each session's `WebhookConfig`, applies the subscription filter, and
/// hands matching events to the delivery queue.
pub struct EventDispatcher {
    store: Arc<SessionStore>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    delivery_tx: mpsc::Sender<WebhookDelivery>,
}

impl EventDispatcher {
    pub fn new(store: Arc<SessionStore>, delivery_tx: mpsc::Sender<WebhookDelivery>) -> Self {
        EventDispatcher {
            store,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(5),
            delivery_tx,
        }
    }

    fn cached_config(&self, session_id: &str) -> GatewayResult<Option<WebhookConfig>> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(session_id) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.config.clone());
                }
            }
        }
        let config = self.store.get_webhook_config(session_id)?;
        self.cache.lock().insert(
            session_id.to_string(),
            CacheEntry { config: config.clone(), fetched_at: Instant::now() },
        );
        Ok(config)
    }

    /// Invalidate the cache entry for a session — call after a webhook
    /// config update so the next event doesn't use a stale filter.
    pub fn invalidate(&self, session_id: &str) {
        self.cache.lock().remove(session_id);
    }

    /// §4.5: translate-and-enqueue. Dropping silently (not an error) is the
    /// correct outcome for "no config", "disabled", and "filtered" — only
    /// store/queue failures are surfaced.
    pub async fn dispatch(&self, event: DomainEvent) -> GatewayResult<()> {
        let config = match self.cached_config(&event.session_id)? {
            Some(c) => c,
            None => {
                trace!(session_id = %event.session_id, "no webhook configured, dropping event");
                return Ok(());
            }
        };
        if !config.enabled {
            trace!(session_id = %event.session_id, "webhook disabled, dropping event");
            return Ok(());
        }
        if !config.subscribes_to(event.event_type) {
            trace!(session_id = %event.session_id, ty = %event.event_type, "not subscribed, dropping event");
            return Ok(());
        }

        let delivery = WebhookDelivery::new(event.session_id.clone(), event);
        debug!(delivery_id = %delivery.id, session_id = %delivery.session_id, "enqueuing webhook delivery");
        self.delivery_tx
            .send(delivery)
            .await
            .map_err(|_| crate::atoms::error::GatewayError::Fatal("webhook queue closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{DomainEventType, Session};

    fn setup() -> (Arc<SessionStore>, String) {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let session = Session::new("alice");
        store.create_session(&session).unwrap();
        (store, session.id)
    }

    #[tokio::test]
    async fn drops_when_no_config() {
        let (store, id) = setup();
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = EventDispatcher::new(store, tx);
        let event = DomainEvent::new(id, DomainEventType::Connected, serde_json::json!({}));
        dispatcher.dispatch(event).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drops_when_disabled() {
        let (store, id) = setup();
        store
            .upsert_webhook_config(&WebhookConfig {
                session_id: id.clone(),
                url: "https://example.com/hook".into(),
                secret: None,
                enabled: false,
                events: vec![],
            })
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = EventDispatcher::new(store, tx);
        let event = DomainEvent::new(id, DomainEventType::Connected, serde_json::json!({}));
        dispatcher.dispatch(event).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivers_when_subscribed() {
        let (store, id) = setup();
        store
            .upsert_webhook_config(&WebhookConfig {
                session_id: id.clone(),
                url: "https://example.com/hook".into(),
                secret: None,
                enabled: true,
                events: vec![DomainEventType::Connected],
            })
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = EventDispatcher::new(store, tx);
        let event = DomainEvent::new(id.clone(), DomainEventType::Connected, serde_json::json!({}));
        dispatcher.dispatch(event).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.session_id, id);
    }

    #[tokio::test]
    async fn filters_unsubscribed_type() {
        let (store, id) = setup();
        store
            .upsert_webhook_config(&WebhookConfig {
                session_id: id.clone(),
                url: "https://example.com/hook".into(),
                secret: None,
                enabled: true,
                events: vec![DomainEventType::Message],
            })
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = EventDispatcher::new(store, tx);
        let event = DomainEvent::new(id, DomainEventType::Connected, serde_json::json!({}));
        dispatcher.dispatch(event).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
