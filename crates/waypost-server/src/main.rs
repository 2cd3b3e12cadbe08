use std::{net::SocketAddr, sync::Arc};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use waypost_agent::{Agent, AgentOptions};
use waypost_core::SystemClock;
use waypost_db::DbStore;
use waypost_server::{Registry, RegistryConfig};
use waypost_wire::InMemoryFabric;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_addr: SocketAddr = std::env::var("WAYPOST_METRICS_ADDR")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 9000)));
    match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
        Ok(()) => tracing::info!("metrics exported on {}", metrics_addr),
        Err(e) => tracing::warn!("metrics exporter disabled: {}", e),
    }

    let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| "waypost.db".to_string());
    let store = Arc::new(DbStore::new(&db_path)?);
    let fabric = Arc::new(InMemoryFabric::new());
    let config = RegistryConfig::from_env();
    let local_prefix = config.prefixes.first().cloned().flatten();

    let registry = Registry::new(config, fabric.clone(), store, Arc::new(SystemClock));
    let (registry, registry_task) = waypost_server::spawn(registry)?;
    tracing::info!(identity = registry.identity(), "gateway started");

    let mut agents = Vec::new();
    let names = std::env::var("WAYPOST_LOCAL_AGENTS").unwrap_or_default();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let options = AgentOptions::new(name).with_prefix(local_prefix.clone());
        let agent = Agent::new(options, fabric.clone());
        agents.push(waypost_agent::spawn(agent)?);
    }

    let signal = shutdown_signal().await;
    tracing::info!(signal, "signal received, starting graceful shutdown");

    for (agent, task) in agents {
        agent.shutdown();
        let _ = task.await;
    }
    registry.shutdown();
    if let Err(e) = registry_task.await {
        tracing::error!("registry task failed: {}", e);
    }

    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    first_signal(tokio::signal::ctrl_c(), terminate).await
}

/// An interrupt source that fails to install never resolves, so the other
/// one still gets a chance to stop the process.
async fn first_signal(
    interrupt: impl Future<Output = std::io::Result<()>>,
    terminate: impl Future<Output = ()>,
) -> &'static str {
    let interrupt = async {
        if let Err(e) = interrupt.await {
            tracing::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => "interrupt",
        _ = terminate => "terminate",
    }
}
