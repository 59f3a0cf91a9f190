//! chainladder-agent HTTP server binary.
//!
//! # Environment Variables
//!
//! - `DISPATCH_CONFIG`: Optional YAML configuration file
//! - `PORT`: HTTP port (default: 7860)
//! - `DISPATCH_MAX_DEPTH`: Capability invocations per request (default: 6)
//! - `DISPATCH_INVOCATION_TIMEOUT`: Seconds per capability call (default: 120)
//! - `RESERVING_BACKEND_URL`: Actuarial computation service
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL`: Hosted model
//! - `RUST_LOG`: Tracing filter (default: "info,chainladder_agent=debug")
//!
//! # Usage
//!
//! ```bash
//! OPENAI_API_KEY=sk-... cargo run --bin server
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chainladder_agent::capabilities::CapabilityRegistry;
use chainladder_agent::chat::ChatService;
use chainladder_agent::config::DispatchConfig;
use chainladder_agent::presentation::LogSink;
use chainladder_agent::server::{app_router, AppState};
use chainladder_agent::session::SessionStore;
use chainladder_agent::specialists::{self, HttpReservingBackend};

fn load_config() -> anyhow::Result<DispatchConfig> {
    let mut config = match std::env::var("DISPATCH_CONFIG") {
        Ok(path) => DispatchConfig::from_yaml_file(&path)?,
        Err(_) => DispatchConfig::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chainladder_agent=debug".into()),
        )
        .init();

    let config = load_config().context("invalid configuration")?;
    let catalog = Arc::new(config.catalog()?);

    let backend = HttpReservingBackend::new(
        &config.backend_url,
        Duration::from_secs(config.invocation_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("cannot build reserving backend client: {}", e))?;

    let mut registry = CapabilityRegistry::new();
    specialists::register_all(&mut registry, Arc::new(backend), Arc::clone(&catalog))?;

    if !config.llm.has_api_key() {
        tracing::warn!("OPENAI_API_KEY not set; requests must supply their own key");
    }
    let chat = ChatService::new(Arc::new(registry), Arc::new(SessionStore::new()), catalog)
        .with_router_config(config.router_config())
        .with_sink(Arc::new(LogSink))
        .with_llm(config.llm.clone())?;

    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("chainladder-agent server starting on {}", bind_addr);
    tracing::info!("  reserving backend: {}", config.backend_url);
    tracing::info!("  model: {}, max depth: {}", config.llm.model, config.max_depth);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app_router(AppState::new(chat)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    Ok(())
}
