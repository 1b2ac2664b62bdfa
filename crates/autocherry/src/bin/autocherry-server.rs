//! autocherry service binary.
//!
//! Receives GitHub webhooks and queue envelopes over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autocherry::server::{build_router, AppState};
use autocherry::{Config, GitHubApp, GitWorkExecutor, Processor, ProcessorSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "autocherry-server", version, about = "Cherry-pick merged pull requests into release branches")]
struct Cli {
    /// Port to listen on (overrides LISTEN_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.log_format)?;

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    info!(?config, "Starting autocherry");

    let app = GitHubApp::new(&config.api_url, config.app_id, &config.private_key_pem)
        .context("Failed to initialise GitHub App credentials")?;
    let mut executor = GitWorkExecutor::new(config.git_host.clone());
    if let Some(dir) = &config.scratch_dir {
        executor = executor.with_scratch_root(dir);
    }
    let processor = Processor::new(ProcessorSettings::from(&config), Arc::new(app), Arc::new(executor));

    let router = build_router(Arc::new(AppState { processor }), config.max_body_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("autocherry stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("autocherry=info,tower_http=info"))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
