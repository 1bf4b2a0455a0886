use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pns_config::{ConfigurationManager, DEFAULT_CONFIG_PATH};
use pns_server::{PushService, ingest, init_tracing, spawn_reload_listener};

/// Push notification delivery service.
///
/// Reads line-delimited JSON commands from stdin and answers on stdout.
#[derive(Debug, Parser)]
#[command(name = "pns-server", version, about)]
struct Cli {
    /// Settings file
    #[arg(short, long, env = "PNS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Do not reload the settings file on change
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();

    let manager = ConfigurationManager::load(cli.config.clone())
        .with_context(|| format!("Configuration error in {}", cli.config.display()))?;
    let manager = Arc::new(manager);
    let log = init_tracing(&manager.config().logging.level);
    tracing::info!(path = %cli.config.display(), "Configuration loaded");

    let service = Arc::new(PushService::build(Arc::clone(&manager))?);
    tracing::info!(
        transports = ?service.transports.ids(),
        pool = service.pool.max_concurrent(),
        "Push service ready"
    );

    if !cli.no_watch {
        manager.start_watching().await;
        tracing::info!("Hot-reload enabled");
    }
    let listener = spawn_reload_listener(Arc::clone(&service), log);

    tokio::select! {
        result = ingest::run(&service, tokio::io::stdin(), tokio::io::stdout()) => {
            result.context("Command stream failed")?;
            tracing::info!("Command stream closed");
        }
        _ = shutdown_signal() => {}
    }

    manager.stop_watching().await;
    listener.abort();
    // Let submitted deliveries finish
    service.pool.drain().await;
    tracing::info!("Push service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
