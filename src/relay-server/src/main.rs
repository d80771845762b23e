//! Relay Server - WebSocket server binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use relay_server::{RuntimeKind, ServerConfig, run_with_shutdown};

/// Relay Server
#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "Relays WebSocket chat clients to a Claude Code agent runtime")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides PORT)
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory the agent works in (overrides CWD)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Agent runtime: claude or echo
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Model passed to the agent runtime
    #[arg(long)]
    model: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::from_env()?,
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(cwd) = &args.cwd {
        config.cwd = Some(cwd.clone());
    }
    if let Some(runtime) = args.runtime {
        config.runtime.kind = runtime;
    }
    if let Some(model) = &args.model {
        config.runtime.model = Some(model.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    let config = load_config(&args);
    match &config {
        Ok(c) => setup_logging(&c.logging.level, c.logging.is_json()),
        Err(_) => setup_logging(args.log_level.as_deref().unwrap_or("info"), args.json_logs),
    }

    match &dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if !e.not_found() => warn!("Failed to read .env: {}", e),
        Err(_) => {}
    }

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting relay server on {}", config.listen_addr);
    info!("Press Ctrl+C to stop");

    let shutdown_timeout = config.shutdown_timeout;
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();

    // Create shutdown signal
    let shutdown = async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
            }
        }
        let _ = signalled_tx.send(());
    };

    // Bound the graceful phase once a signal has arrived.
    let deadline = async move {
        if signalled_rx.await.is_ok() {
            tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let result = tokio::select! {
        result = run_with_shutdown(config, shutdown) => result,
        _ = deadline => {
            warn!("Graceful shutdown timed out after {}s", shutdown_timeout);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}
