//! Claude Manager Server
//!
//! Runs Claude CLI sessions inside PTYs, tracks whether each one is idle,
//! busy or waiting for confirmation, and streams everything to dashboard
//! clients over WebSocket.

mod config;
mod events;
mod pty;
mod server;
mod session;
mod summary;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use server::{MessageHandler, ServerConfig, WebSocketServer};
use session::SessionManager;
use summary::{AnthropicSummarizer, SummaryQueue};

/// Claude Manager Server
///
/// Multi-session manager for the Claude CLI
#[derive(Parser, Debug)]
#[command(name = "claude-manager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (the next free port is used if taken)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Settings file (default: ~/.config/claude-manager/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command started in new sessions
    #[arg(long)]
    launch_command: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Claude Manager v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(&args)?;

    let (events_tx, _) = broadcast::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let manager = SessionManager::new(
        settings.session.clone(),
        settings.status.clone(),
        Arc::new(events_tx.clone()),
    );

    let summarizer = AnthropicSummarizer::new(&settings.summary)
        .context("Failed to create summarization client")?;
    if !summarizer.has_api_key() {
        warn!("ANTHROPIC_API_KEY is not set, summary requests will fail");
    }
    let summaries = SummaryQueue::start(
        &settings.summary,
        Arc::new(summarizer),
        Arc::new(manager.clone()),
    );

    let config = ServerConfig::from(&settings.server);
    let handler = MessageHandler::new(manager.clone(), summaries);
    let server = Arc::new(WebSocketServer::new(config, handler, events_tx));
    let server_handle = Arc::clone(&server);

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    let result = server.run().await;

    manager.destroy_all().await;
    result?;

    info!("Server shutdown complete");
    Ok(())
}

/// Load the settings file, then apply environment and command-line overrides
fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let path = args.config.clone().or_else(Settings::default_path);

    let mut settings = match &path {
        Some(path) => {
            let settings = Settings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            info!("Settings: {}", path.display());
            settings
        }
        None => Settings::default(),
    };
    settings.apply_env();

    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(bind) = &args.bind {
        settings.server.bind = bind.clone();
    }
    if let Some(command) = &args.launch_command {
        settings.session.launch_command = command.clone();
    }

    Ok(settings)
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
