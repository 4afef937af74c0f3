mod cli;
mod config;
mod repl;

use std::sync::Arc;

use anyhow::{Context, Result};
use chatrelay_client::{
    ChatController, HttpRelayClient, InMemoryMessageStore, MessageStore, RedbMessageStore,
};
use clap::Parser;
use cli::{Cli, Commands};
use config::{CliConfig, Resolved};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(log_dir) = config::data_dir().map(|dir| dir.join("logs")) else {
        return Ok(None);
    };
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    // Logs go to a file so streamed replies on stdout stay clean.
    let file_appender = tracing_appender::rolling::daily(log_dir, "chatrelay.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .init();

    Ok(Some(guard))
}

fn open_store(resolved: &Resolved) -> Result<Arc<dyn MessageStore>> {
    match &resolved.db_path {
        Some(path) => {
            let store = RedbMessageStore::open(path)
                .with_context(|| format!("Failed to open transcript database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryMessageStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_guard = init_logging(cli.verbose)?;

    let resolved = Resolved::new(&cli, CliConfig::load());
    tracing::info!(server_url = %resolved.server_url, provider = %resolved.settings.provider, "Starting chatrelay CLI");

    let store = open_store(&resolved)?;
    let transport = Arc::new(HttpRelayClient::new(resolved.server_url.clone()));
    let controller = ChatController::new(transport, store.clone());
    controller.set_settings(resolved.settings.clone());
    controller.select_assistant(resolved.assistant_id.clone());

    match cli.command {
        Some(Commands::Ask { message }) => {
            if !repl::ask(&controller, &message).await {
                drop(log_guard);
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Sessions) => repl::print_sessions(store.as_ref()).await,
        Some(Commands::Chat { session }) => {
            if let Some(id) = session
                && !controller.load_session(&id).await?
            {
                anyhow::bail!("No saved session {}", id);
            }
            repl::run(&controller, store.as_ref(), &resolved.server_url).await
        }
        None => repl::run(&controller, store.as_ref(), &resolved.server_url).await,
    }
}
