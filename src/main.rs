//! Tiered Cache - monitoring server
//!
//! Opens the three tiers under the configured data directory, starts their
//! background tasks and serves the monitoring facade.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::{signal, task::JoinHandle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_cache::{
    api::create_router, spawn_cleanup_task, spawn_maintenance_task, AppState, AsyncDurableCache,
    Config,
};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the memory, quota and durable tiers
/// 4. Start expiry sweeps and the durable maintenance task
/// 5. Serve the router until SIGINT/SIGTERM, then close the durable tier
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tiered Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: port={}, data_dir={}, quota={}B, memory_max_entries={}, durable_max_entries={}",
        config.server_port,
        config.data_dir.display(),
        config.quota_bytes,
        config.memory.max_entries,
        config.durable.max_entries
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let state = AppState::from_config(&config).context("opening cache tiers")?;
    info!("Cache tiers initialized");

    let tasks = vec![
        spawn_cleanup_task(state.memory.clone(), config.memory.cleanup_interval_ms),
        spawn_cleanup_task(state.quota.clone(), config.quota.cleanup_interval_ms),
        spawn_maintenance_task(state.durable.clone()),
    ];
    info!("Background tasks started");

    let durable = state.durable.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks, durable))
        .await
        .context("serving HTTP")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops background work.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>, durable: AsyncDurableCache) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");

    durable.close().await;
    info!("Durable tier closed");
}
