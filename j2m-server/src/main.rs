use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use j2m_core::{ChatApi, SqliteStore, TrackerApi};
use j2m_server::config::Config;
use j2m_server::matrix::MatrixClient;
use j2m_server::state_machine::spawn_safety_timer;
use j2m_server::tracker::JiraClient;
use j2m_server::{build_app, build_router, get_bot_version};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting j2m bridge {}", get_bot_version());

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.state_dir.join("j2m-queue.db");
    info!("Using queue database: {}", db_path.display());
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("Failed to open queue database {}", db_path.display()))?;

    let tracker = Arc::new(JiraClient::new(&config.jira));
    if let Err(e) = tracker.ping().await {
        warn!(
            "Tracker at {} is not reachable yet, hooks will fail until it is: {}",
            config.jira.url, e
        );
    }
    let chat = Arc::new(MatrixClient::new(&config.matrix));

    let chat_api: Arc<dyn ChatApi> = chat;
    let tracker_api: Arc<dyn TrackerApi> = tracker;
    let (state, machine) = build_app(
        &config,
        Arc::new(store),
        Arc::clone(&chat_api),
        tracker_api,
    );

    let replay = state.replay.clone();
    tokio::spawn(machine.run());
    spawn_safety_timer(replay, chat_api, config.drain_interval);

    let app = build_router(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
