//! Background prober for active TCP health checks.

use std::sync::Arc;
use std::time::Duration;

use tachyon_core::LoadBalancer;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;

/// Spawns a background Tokio task that periodically probes every registered
/// host and feeds the verdict into the engine's health flags.
pub fn spawn_health_checker(engine: Arc<LoadBalancer>, interval: Duration, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);

        // Prevent immediately ticking when spawned
        ticker.tick().await;

        loop {
            ticker.tick().await;
            probe_all(&engine, timeout).await;
        }
    })
}

/// Probe every registered host once. Transitions are logged by the engine.
pub async fn probe_all(engine: &LoadBalancer, timeout: Duration) {
    for host in engine.list_hosts() {
        let healthy = probe(&host, timeout).await;
        if let Err(error) = engine.set_healthy(&host, healthy) {
            // unregistered while we were probing
            tracing::debug!(%host, %error, "probe result discarded");
        }
    }
}

/// A plain TCP connect within `timeout`.
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    matches!(time::timeout(timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}
