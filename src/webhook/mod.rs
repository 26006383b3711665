// ── Webhook Delivery Worker Pool (C6) ───────────────────────────────────────
// Dequeues deliveries enqueued by the Event Dispatcher, signs and POSTs them
// with bounded retry/backoff (§4.6). A fixed set of worker tasks share one
// multi-consumer queue — the same "fixed-size pool over a bounded queue"
// shape as the teacher's `run_semaphore`-gated concurrency limiter in
// `EngineState`, generalised here into per-destination and per-session
// admission control (see `concurrency` submodule).

pub mod concurrency;
pub mod signing;

use crate::atoms::error::GatewayResult;
use crate::atoms::types::WebhookDelivery;
use crate::config::GatewayConfig;
use crate::store::SessionStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use concurrency::ConcurrencyGuards;

/// Handle producers use to enqueue a delivery (`EventDispatcher` holds the
/// sender half directly; this wraps the pool's lifecycle).
pub type DeliverySender = mpsc::Sender<WebhookDelivery>;

pub struct WebhookPool {
    store: Arc<SessionStore>,
    client: reqwest::Client,
    receiver: Arc<AsyncMutex<mpsc::Receiver<WebhookDelivery>>>,
    guards: Arc<ConcurrencyGuards>,
    worker_count: usize,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl WebhookPool {
    /// Build the queue + pool. Returns the pool (call `spawn_workers` to
    /// start consuming) and the sender half the dispatcher enqueues onto.
    pub fn new(store: Arc<SessionStore>, config: &GatewayConfig, queue_capacity: usize) -> (Self, DeliverySender) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builder with static config never fails");

        let pool = WebhookPool {
            store,
            client,
            receiver: Arc::new(AsyncMutex::new(rx)),
            guards: Arc::new(ConcurrencyGuards::new(config.webhook_per_destination_limit)),
            worker_count: config.webhook_worker_count,
            max_attempts: config.webhook_max_attempts,
            base_backoff: config.webhook_base_backoff,
            max_backoff: config.webhook_max_backoff,
        };
        (pool, tx)
    }

    /// Spawn `worker_count` tasks pulling from the shared queue. Returns
    /// their join handles so callers can await clean shutdown.
    pub fn spawn_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let receiver = self.receiver.clone();
            let store = self.store.clone();
            let client = self.client.clone();
            let guards = self.guards.clone();
            let max_attempts = self.max_attempts;
            let base_backoff = self.base_backoff;
            let max_backoff = self.max_backoff;

            handles.push(tokio::spawn(async move {
                loop {
                    let delivery = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let delivery = match delivery {
                        Some(d) => d,
                        None => {
                            debug!(worker_id, "webhook queue closed, worker exiting");
                            break;
                        }
                    };
                    process_delivery(&store, &client, &guards, delivery, max_attempts, base_backoff, max_backoff)
                        .await;
                }
            }));
        }
        handles
    }

    /// Start the idle-eviction janitor for the per-destination/per-session
    /// concurrency tables (SPEC_FULL.md "gc_idle_after eviction").
    pub fn spawn_janitor(&self, interval: Duration, idle_after: Duration) -> tokio::task::JoinHandle<()> {
        let guards = self.guards.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                guards.evict_idle(idle_after);
            }
        })
    }
}

async fn process_delivery(
    store: &SessionStore,
    client: &reqwest::Client,
    guards: &ConcurrencyGuards,
    mut delivery: WebhookDelivery,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
) {
    let config = match store.get_webhook_config(&delivery.session_id) {
        Ok(Some(c)) if c.enabled => c,
        Ok(_) => {
            debug!(delivery_id = %delivery.id, "webhook config removed/disabled before delivery, dropping");
            return;
        }
        Err(e) => {
            warn!(delivery_id = %delivery.id, error = %e, "failed to load webhook config, dropping delivery");
            return;
        }
    };

    let host = host_of(&config.url);
    let session_lock = guards.session_slot(&delivery.session_id);
    let _session_guard = session_lock.lock().await;

    let body = serde_json::json!({
        "id": delivery.id,
        "type": delivery.event.event_type,
        "sessionId": delivery.session_id,
        "timestamp": delivery.event.timestamp,
        "data": delivery.event.data,
    });
    let body_bytes = match serde_json::to_vec(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(delivery_id = %delivery.id, error = %e, "failed to serialize webhook body, dropping");
            return;
        }
    };

    loop {
        delivery.attempt += 1;

        let destination_semaphore = guards.destination_slot(&host);
        let _permit = destination_semaphore.acquire().await.expect("semaphore is never closed");

        let mut request = client
            .post(&config.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", delivery.event.event_type.to_string())
            .header("X-Webhook-Delivery", delivery.id.clone())
            .body(body_bytes.clone());
        if let Some(secret) = &config.secret {
            request = request.header("X-Webhook-Signature", signing::sign(secret, &body_bytes));
        }

        let outcome = request.send().await;
        drop(_permit);

        let retryable = match &outcome {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    delivery.last_status = Some(status.as_u16());
                    info!(
                        delivery_id = %delivery.id, session_id = %delivery.session_id,
                        attempt = delivery.attempt, status = status.as_u16(),
                        "webhook delivered"
                    );
                    return;
                }
                delivery.last_status = Some(status.as_u16());
                // §4.6: "4xx other than 408/429: treated as retryable up to
                // max" — so every non-2xx response is retryable here.
                true
            }
            Err(e) => {
                warn!(delivery_id = %delivery.id, attempt = delivery.attempt, error = %e, "webhook transport error");
                true
            }
        };

        if !retryable || delivery.attempt >= max_attempts {
            warn!(
                delivery_id = %delivery.id, session_id = %delivery.session_id,
                attempt = delivery.attempt, last_status = ?delivery.last_status,
                "webhook delivery exhausted retries, dropping"
            );
            return;
        }

        let wait = backoff_with_jitter(delivery.attempt, base_backoff, max_backoff);
        delivery.next_attempt_at = chrono::Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default();
        tokio::time::sleep(wait).await;
    }
}

/// Exponential backoff, base 1s factor 2, ±25% jitter, capped at
/// `max_backoff` (§4.6).
fn backoff_with_jitter(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20).saturating_sub(1));
    let capped = exp.min(max.as_millis()).max(1) as u64;
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered = (capped as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered.max(0.0) as u64)
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        let first = backoff_with_jitter(1, base, max);
        assert!(first.as_millis() >= 750 && first.as_millis() <= 1250);

        let late = backoff_with_jitter(10, base, max);
        assert!(late.as_secs_f64() <= 75.0);
    }

    #[test]
    fn host_extraction_handles_typical_urls() {
        assert_eq!(host_of("https://example.com/hook"), "example.com");
        assert_eq!(host_of("http://127.0.0.1:8080/x"), "127.0.0.1");
    }
}
