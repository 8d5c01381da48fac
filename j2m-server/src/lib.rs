pub mod client;
pub mod config;
pub mod dispatch;
pub mod filter;
pub mod ingest;
pub mod matrix;
pub mod parser;
pub mod state_machine;
pub mod tracker;
pub mod webhook;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use j2m_core::{ChatApi, DurableQueue, IgnoreListStore, KeyValueStore, TrackerApi};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::filter::HookFilter;
use crate::ingest::Pipeline;
use crate::parser::ParserRegistry;
use crate::state_machine::{ReplayHandle, ReplayMachine};
use crate::webhook::webhook_router;

pub const SERVICE_NAME: &str = "j2m";

pub fn get_bot_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub queue: DurableQueue,
    pub replay: ReplayHandle,
    pub webhook_secret: Option<String>,
}

/// Wire filter, parsers, queue, dispatcher and replay machine together.
/// The returned machine must be spawned for anything to be dispatched.
pub fn build_app(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
    chat: Arc<dyn ChatApi>,
    tracker: Arc<dyn TrackerApi>,
) -> (Arc<AppState>, ReplayMachine) {
    let queue = DurableQueue::new(Arc::clone(&store), config.queue_prefix.clone());
    let ignore_list = IgnoreListStore::new(store, &config.queue_prefix);

    let dispatcher = Dispatcher::new(queue.clone(), Arc::clone(&chat), Arc::clone(&tracker));
    let (machine, replay) = ReplayMachine::new(chat, Arc::new(dispatcher), config.reconnect);

    let filter = HookFilter::new(
        tracker,
        ignore_list,
        config.features.clone(),
        config.filter_settings(),
    );
    let parsers = ParserRegistry::new(config.features.clone());
    let pipeline = Pipeline::new(filter, parsers, queue.clone(), replay.clone());

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        queue,
        replay,
        webhook_secret: config.webhook_secret.clone(),
    });
    (state, machine)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": get_bot_version(),
    }))
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let depth = state.queue.depth().await.map_err(|e| {
        error!("Could not read queue depth: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let machine = state.replay.current_state();
    Ok(Json(json!({
        "service": SERVICE_NAME,
        "version": get_bot_version(),
        "state": machine.name(),
        "detail": machine,
        "connected": machine.is_connected(),
        "queue": depth,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .merge(webhook_router(Arc::clone(&state)))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
