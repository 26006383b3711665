// whatsapp-gateway — binary entry point.
//
// Wires the Session Store, Protocol Adapter, Event Dispatcher, Webhook Pool
// and Session Registry together, then blocks until SIGINT/SIGTERM and drains
// everything in order: stop accepting new runner work, disconnect every live
// session, let in-flight webhook deliveries finish (§6 "graceful shutdown").

use gateway::protocol::{HttpBridgeAdapter, HttpBridgeConfig, ProtocolAdapter};
use gateway::{EventDispatcher, GatewayConfig, LifecycleFacade, SessionRegistry, SessionStore, WebhookPool};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config = match GatewayConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> gateway::GatewayResult<()> {
    tracing::info!(database_url = %config.database_url, "starting whatsapp gateway");

    let store = Arc::new(SessionStore::open(&config.database_url)?);

    let bridge_config = HttpBridgeConfig {
        base_url: std::env::var("BRIDGE_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8090".into()),
        api_key: std::env::var("BRIDGE_API_KEY").unwrap_or_else(|_| config.api_key.clone()),
        webhook_bind: std::env::var("BRIDGE_WEBHOOK_BIND").unwrap_or_else(|_| "127.0.0.1".into()),
        webhook_port: std::env::var("BRIDGE_WEBHOOK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8091),
    };
    let bridge = Arc::new(HttpBridgeAdapter::new(bridge_config));
    bridge.ensure_webhook_listener();
    let adapter: Arc<dyn ProtocolAdapter> = bridge;

    let (webhook_pool, delivery_tx) = WebhookPool::new(store.clone(), &config, 1024);
    let webhook_workers = webhook_pool.spawn_workers();
    let janitor = webhook_pool.spawn_janitor(Duration::from_secs(60), Duration::from_secs(600));

    let dispatcher = Arc::new(EventDispatcher::new(store.clone(), delivery_tx));
    let registry = Arc::new(SessionRegistry::new(store.clone(), adapter, dispatcher, &config));
    let _facade = LifecycleFacade::new(registry.clone(), &config);

    // The Facade above is the surface an external HTTP/RPC layer would call
    // into (§1, §4.7); wiring that transport is out of scope here (§1
    // Non-goals), so this binary simply keeps the engine alive until asked
    // to shut down.
    tracing::info!("gateway ready");
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");

    registry.shutdown_all(Duration::from_secs(10)).await;
    janitor.abort();
    for worker in webhook_workers {
        worker.abort();
    }

    tracing::info!("gateway stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
