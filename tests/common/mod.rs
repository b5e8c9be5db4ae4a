use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use satgate::config::Config;
use satgate::gateway::Gateway;
use satgate::store::{MemStore, Store};

/// Test configuration with fast tickers and a tempdir-backed WAL.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        wal_path: dir.path().join("data.wal"),
        batch_timeout: Duration::from_millis(50),
        health_check_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(5),
        circuit_breaker_timeout: Duration::from_millis(200),
        ..Config::default()
    }
}

/// Starts a gateway over the in-memory store and serves it on an ephemeral
/// port. Returns the bound address and the gateway for lifecycle control.
pub async fn spawn_gateway(cfg: Config, mem: MemStore) -> (SocketAddr, Gateway) {
    let mut gateway = Gateway::new(cfg, Arc::new(Store::Mem(mem)));
    gateway.start();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let router = gateway.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    (addr, gateway)
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// JSON body for a nominal telemetry sample.
pub fn sample_json(satellite_id: &str, battery: f64, storage: f64, signal: f64) -> serde_json::Value {
    serde_json::json!({
        "satellite_id": satellite_id,
        "battery_charge_percent": battery,
        "storage_usage_mb": storage,
        "signal_strength_dbm": signal,
    })
}
