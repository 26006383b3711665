// ── Webhook Pool: Concurrency Admission Control ─────────────────────────────
// Per-destination-host semaphores and per-session FIFO delivery slots, both
// generalised from the teacher's single `run_semaphore: Arc<Semaphore>` field
// in `EngineState` — here keyed rather than global, since one process serves
// many sessions and many destination hosts at once (§4.6, §5).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

struct Tracked<T> {
    value: Arc<T>,
    last_used: Instant,
}

/// Owns the two keyed tables the webhook pool consults before every POST:
/// a semaphore per destination host (bounds concurrent in-flight requests
/// to one receiver) and a mutex per session id (ensures only one delivery
/// for a given session is in flight at a time, §5 "recommended... per-session
/// delivery slot"). This bounds concurrency, not order — whichever worker
/// acquires the lock next sends next, so emission order isn't guaranteed
/// (§5 explicitly softens that to "not strictly required"). Both tables are
/// pruned by `evict_idle` once their only reference is this table's own — an
/// unbounded set of hosts/sessions would otherwise accumulate for the life
/// of the process.
pub struct ConcurrencyGuards {
    per_destination_limit: usize,
    destinations: Mutex<HashMap<String, Tracked<Semaphore>>>,
    sessions: Mutex<HashMap<String, Tracked<AsyncMutex<()>>>>,
}

impl ConcurrencyGuards {
    pub fn new(per_destination_limit: usize) -> Self {
        ConcurrencyGuards {
            per_destination_limit: per_destination_limit.max(1),
            destinations: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn destination_slot(&self, host: &str) -> Arc<Semaphore> {
        let mut table = self.destinations.lock();
        if let Some(entry) = table.get_mut(host) {
            entry.last_used = Instant::now();
            return entry.value.clone();
        }
        let sem = Arc::new(Semaphore::new(self.per_destination_limit));
        table.insert(host.to_string(), Tracked { value: sem.clone(), last_used: Instant::now() });
        sem
    }

    pub fn session_slot(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.sessions.lock();
        if let Some(entry) = table.get_mut(session_id) {
            entry.last_used = Instant::now();
            return entry.value.clone();
        }
        let lock = Arc::new(AsyncMutex::new(()));
        table.insert(session_id.to_string(), Tracked { value: lock.clone(), last_used: Instant::now() });
        lock
    }

    /// Drop table entries idle longer than `idle_after` and not currently
    /// held elsewhere (`Arc::strong_count` of 1 means only this table's
    /// clone remains).
    pub fn evict_idle(&self, idle_after: Duration) {
        let now = Instant::now();
        self.destinations
            .lock()
            .retain(|_, t| Arc::strong_count(&t.value) > 1 || now.duration_since(t.last_used) < idle_after);
        self.sessions
            .lock()
            .retain(|_, t| Arc::strong_count(&t.value) > 1 || now.duration_since(t.last_used) < idle_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_returns_same_semaphore() {
        let guards = ConcurrencyGuards::new(2);
        let a = guards.destination_slot("example.com");
        let b = guards.destination_slot("example.com");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_keys_get_distinct_slots() {
        let guards = ConcurrencyGuards::new(2);
        let a = guards.session_slot("s1");
        let b = guards.session_slot("s2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn evict_idle_drops_unreferenced_entries() {
        let guards = ConcurrencyGuards::new(2);
        let _kept = guards.destination_slot("kept.example.com");
        {
            let _dropped = guards.destination_slot("dropped.example.com");
        }
        guards.evict_idle(Duration::from_secs(0));
        let table = guards.destinations.lock();
        assert!(table.contains_key("kept.example.com"));
        assert!(!table.contains_key("dropped.example.com"));
    }
}
