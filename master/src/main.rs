mod config;
mod failover;
mod handlers;
mod monitor;
mod queue;
mod registry;
mod rpc;
mod scheduler;
mod state;
mod tracker;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use common::LocalStorage;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::MasterConfig;
use crate::rpc::HttpWorkerRpc;
use crate::tracker::JobTracker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let config = MasterConfig::from_env()?;
    info!(
        "config: admission={} dispatchers={} check_period={:?} heartbeat_timeout={:?}",
        config.admission_threads,
        config.dispatcher_threads,
        config.check_period,
        config.heartbeat_timeout
    );

    let rpc = Arc::new(HttpWorkerRpc::new(config.rpc_timeout)?);
    let tracker = Arc::new(JobTracker::new(config.clone(), rpc, Arc::new(LocalStorage)));

    // despachadores de mappers
    scheduler::spawn_dispatchers(&tracker, config.dispatcher_threads);

    // monitor de heartbeats en segundo plano
    tokio::spawn(monitor::run_liveness_loop(Arc::clone(&tracker)));

    let app = handlers::build_router(tracker);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", config.bind_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
