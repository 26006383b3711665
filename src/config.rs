// Gateway Config — environment-driven configuration.
//
// Required: DATABASE_URL, API_KEY, LOG_LEVEL (§6: "a database URL, an API
// key, and a log level are required"). Everything else has the defaults §4
// lists; override via env var when a deployment needs to.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Path to the SQLite database file (or `:memory:` for tests).
    pub database_url: String,
    /// Static API key compared against the `Authorization` header by the
    /// (out-of-scope) HTTP layer; the core only carries the value through.
    pub api_key: String,
    pub log_level: String,

    pub qr_ttl: Duration,
    pub webhook_worker_count: usize,
    pub webhook_max_attempts: u32,
    pub webhook_base_backoff: Duration,
    pub webhook_max_backoff: Duration,
    pub webhook_per_destination_limit: usize,
    pub runner_mailbox_capacity: usize,
    pub facade_default_timeout: Duration,
    pub facade_connect_timeout: Duration,
    /// 0 disables idle-disconnect entirely (the default — see SPEC_FULL.md's
    /// Open Question resolution).
    pub runner_idle_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            database_url: "gateway.db".into(),
            api_key: String::new(),
            log_level: "info".into(),
            qr_ttl: Duration::from_secs(120),
            webhook_worker_count: 4,
            webhook_max_attempts: 5,
            webhook_base_backoff: Duration::from_secs(1),
            webhook_max_backoff: Duration::from_secs(60),
            webhook_per_destination_limit: 2,
            runner_mailbox_capacity: 32,
            facade_default_timeout: Duration::from_secs(10),
            facade_connect_timeout: Duration::from_secs(30),
            runner_idle_timeout: Duration::from_secs(0),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for everything spec §4 doesn't mandate.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = GatewayConfig::default();

        cfg.database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL is required".to_string())?;
        cfg.api_key = std::env::var("API_KEY").map_err(|_| "API_KEY is required".to_string())?;
        if cfg.api_key.trim().is_empty() {
            return Err("API_KEY must not be empty".into());
        }
        cfg.log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| cfg.log_level.clone());

        if let Some(v) = env_u64("QR_TTL_SECS")? {
            cfg.qr_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_usize("WEBHOOK_WORKER_COUNT")? {
            cfg.webhook_worker_count = v;
        }
        if let Some(v) = env_u32("WEBHOOK_MAX_ATTEMPTS")? {
            cfg.webhook_max_attempts = v;
        }
        if let Some(v) = env_u64("WEBHOOK_BASE_BACKOFF_MS")? {
            cfg.webhook_base_backoff = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("WEBHOOK_MAX_BACKOFF_MS")? {
            cfg.webhook_max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = env_usize("WEBHOOK_PER_DESTINATION_LIMIT")? {
            cfg.webhook_per_destination_limit = v;
        }
        if let Some(v) = env_usize("RUNNER_MAILBOX_CAPACITY")? {
            cfg.runner_mailbox_capacity = v;
        }
        if let Some(v) = env_u64("FACADE_DEFAULT_TIMEOUT_SECS")? {
            cfg.facade_default_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FACADE_CONNECT_TIMEOUT_SECS")? {
            cfg.facade_connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("RUNNER_IDLE_TIMEOUT_SECS")? {
            cfg.runner_idle_timeout = Duration::from_secs(v);
        }

        Ok(cfg)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, String> {
    match std::env::var(key) {
        Ok(v) => v.parse::<u64>().map(Some).map_err(|_| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(None),
    }
}

fn env_u32(key: &str) -> Result<Option<u32>, String> {
    match std::env::var(key) {
        Ok(v) => v.parse::<u32>().map(Some).map_err(|_| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(None),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, String> {
    match std::env::var(key) {
        Ok(v) => v.parse::<usize>().map(Some).map_err(|_| format!("{key} must be a non-negative integer")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommendations() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.qr_ttl, Duration::from_secs(120));
        assert_eq!(cfg.webhook_max_attempts, 5);
        assert_eq!(cfg.webhook_base_backoff, Duration::from_secs(1));
        assert_eq!(cfg.webhook_max_backoff, Duration::from_secs(60));
        assert_eq!(cfg.facade_default_timeout, Duration::from_secs(10));
        assert_eq!(cfg.facade_connect_timeout, Duration::from_secs(30));
    }
}
