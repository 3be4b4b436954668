// HTTP API Server module

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::post, Router};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::proxy::{RoutingService, COUNT_TOKENS_PATH, MESSAGES_PATH};
use crate::request_log::RequestLogger;

mod handlers;
pub mod streaming;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_support;

use upstream::UpstreamRelay;

const EVENT_LOGGING_PATH: &str = "/api/event_logging/batch";

static SERVER_HANDLE: OnceCell<RwLock<Option<oneshot::Sender<()>>>> = OnceCell::new();

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub routing: Arc<RoutingService>,
    pub upstream: Arc<UpstreamRelay>,
    pub logger: Arc<dyn RequestLogger>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        custom_system_prompt: Option<String>,
        logger: Arc<dyn RequestLogger>,
    ) -> Result<Self> {
        let routing = RoutingService::new(config.clone(), custom_system_prompt, logger.clone());
        let upstream = UpstreamRelay::new(&config.limits, logger.clone())
            .context("Failed to build upstream HTTP clients")?;
        Ok(Self {
            config,
            routing: Arc::new(routing),
            upstream: Arc::new(upstream),
            logger,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(MESSAGES_PATH, post(handlers::messages))
        .route(COUNT_TOKENS_PATH, post(handlers::count_tokens))
        .route(EVENT_LOGGING_PATH, post(handlers::event_logging_batch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `stop_server` is called.
pub async fn start_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.proxy.host, state.config.proxy.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Proxy listening on http://{}", addr);
    tracing::info!(
        "Primary: {} ({}), secondary: {} ({})",
        state.config.primary.name,
        state.config.primary.base_url,
        state.config.secondary.name,
        state.config.secondary.base_url
    );

    let (tx, rx) = oneshot::channel::<()>();
    SERVER_HANDLE
        .get_or_init(|| RwLock::new(None))
        .write()
        .replace(tx);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await?;

    Ok(())
}

pub fn stop_server() {
    if let Some(lock) = SERVER_HANDLE.get() {
        if let Some(tx) = lock.write().take() {
            let _ = tx.send(());
            tracing::info!("Proxy stopping");
        }
    }
}
