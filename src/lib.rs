// Claude split proxy - routes coding-assistant traffic between two Anthropic-compatible upstreams

pub mod api;
pub mod config;
pub mod error;
pub mod proxy;
pub mod request_log;
pub mod sanitize;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::AppConfig;
use request_log::{DiskLogger, RequestLogger};

/// `RUST_LOG` wins; otherwise `info`, or `debug` when the config asks for it.
pub fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Starts the proxy and serves until Ctrl-C.
pub async fn run(config: AppConfig) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{}", problem);
        }
        bail!("Invalid configuration ({} problem(s))", problems.len());
    }

    let log_dir = PathBuf::from(&config.proxy.log_dir);
    DiskLogger::clear(&log_dir)
        .with_context(|| format!("Failed to clear log directory {:?}", log_dir))?;
    let disk_logger = DiskLogger::start(&log_dir, &config.primary.name, &config.secondary.name);

    let custom_prompt = config.load_system_prompt()?;
    if custom_prompt.is_some() {
        tracing::info!("Using custom system prompt");
    }

    let logger: Arc<dyn RequestLogger> = Arc::new(disk_logger.clone());
    let state = api::AppState::new(Arc::new(config), custom_prompt, logger)?;

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            api::stop_server();
        }
    });

    let served = api::start_server(state).await;
    disk_logger.flush().await;
    served
}
