//! Tachyon Proxy Engine
//!
//! Loads the configuration, registers the backends and starts the listener
//! together with the background tasks that keep the engine fresh.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tachyon_core::tasks::{spawn_cleaner, spawn_rebuilder};
use tachyon_core::LoadBalancer;
use tachyon_proxy::health_check::spawn_health_checker;
use tachyon_proxy::{server, ProxyConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Command line options.
#[derive(Debug, Parser)]
#[command(name = "tachyon-proxy", version, about)]
struct Options {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "tachyon.yaml")]
    config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

/// The primary entrypoint for the Tachyon proxy.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::parse();
    let mut config = ProxyConfig::load(&options.config)?;
    if let Some(listen) = options.listen {
        config.listen = listen;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(config = %options.config.display(), "starting tachyon proxy");

    let engine = Arc::new(LoadBalancer::new(config.balancer.clone())?);
    for backend in &config.backends {
        engine.register_host(backend)?;
    }
    if config.backends.is_empty() {
        tracing::warn!("no backends configured, every connection will be dropped");
    }

    let _cleaner = spawn_cleaner(&engine);
    let _rebuilder = spawn_rebuilder(&engine);
    let _health =
        spawn_health_checker(Arc::clone(&engine), config.health_check.interval(), config.health_check.timeout());

    let listener = TcpListener::bind(config.listen).await?;
    tokio::select! {
        result = server::serve(listener, engine, config.connect_timeout()) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}
