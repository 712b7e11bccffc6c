use std::path::PathBuf;
use std::sync::Arc;

use beacon::config::{BrokerKind, Config};
use beacon::database::LibsqlStore;
use beacon::error::AppError;
use beacon::monitoring::HttpChecker;
use beacon::orchestrator::Orchestrator;
use beacon::pipeline::Pipeline;
use beacon::{api, pool};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file, created with defaults if missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address of the API, overrides `server.addr`
    #[arg(long)]
    addr: Option<String>,

    /// Use the in-process broker instead of Kafka
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logger::init("beacon");

    let cli = Cli::parse();
    let mut config = Config::from_config(cli.config.as_ref())?;
    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if cli.local {
        config.broker.kind = BrokerKind::Memory;
        config.broker.tls = None;
    }
    debug!("{config}");

    run(Arc::new(config)).await
}

async fn run(config: Arc<Config>) -> Result<(), AppError> {
    let pool = pool::open(&config.database).await?;
    let store = Arc::new(LibsqlStore::new(pool));
    let checker = Arc::new(HttpChecker::new(&config.monitor).map_err(anyhow::Error::from)?);
    let pipeline = Pipeline::from_config(&config.broker, config.auditor.readers)
        .await
        .map_err(anyhow::Error::from)?;
    info!(broker = %config.broker.kind, readers = pipeline.sources.len(), "pipeline ready");

    let mut orchestrator = Orchestrator::new(Arc::clone(&config), store, checker, pipeline);
    orchestrator.start().await?;

    let server = api::server(orchestrator.registry(), &config.server, config.shutdown.api_grace)?;
    let handle = server.handle();
    let server_task = tokio::spawn(server);
    info!(addr = %config.server.addr, "API listening");

    tokio::select! {
        signal = shutdown_signal() => signal?,
        served = server_task => {
            // The server only returns on its own when it failed.
            match served {
                Ok(Err(e)) => error!(error = %e, "API server stopped"),
                Err(e) => error!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    handle.stop(true).await;
    info!("API stopped");

    orchestrator.shutdown().await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("SIGINT (Ctrl+C) received, initiating graceful shutdown.");
            }
            _ = terminate.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl+C received, initiating graceful shutdown.");
    }

    Ok(())
}
