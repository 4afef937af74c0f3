#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use chatrelay_server::{api::AppState, build_router, config::ServerConfig};
use tracing_subscriber::EnvFilter;

const LOG_FORMAT_ENV: &str = "CHATRELAY_LOG_FORMAT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,chatrelay_server=debug,chatrelay_ai=debug".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting ChatRelay server");

    let config = ServerConfig::load().context("Failed to load server configuration")?;
    if config.openai.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; OpenAI routes will reject requests");
    }
    if let Some(assistant_id) = &config.openai.assistant_id {
        tracing::info!(assistant_id, "Default assistant configured");
    }
    tracing::info!(
        privacy_mode = config.retrieval.privacy_mode,
        vector_stores = config.openai.vector_store_ids.len(),
        rate_limit = ?config.rate_limit_per_minute,
        "Relay configuration loaded"
    );

    let address = config.bind_address();
    let app = build_router(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    tracing::info!("ChatRelay running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
