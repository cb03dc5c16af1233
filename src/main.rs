//! tgbridge — supervisor binary.
//!
//! Starts the Telegram dispatcher and the hook API concurrently and tears
//! both down when either dies, on an OS signal, or on `/shutdown confirm`.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tgbridge::config::Config;
use tgbridge::http::{self, AppState};
use tgbridge::state::BridgeState;
use tgbridge::telegram::{self, TelegramBridge};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Claude Code ↔ Telegram approval bridge
#[derive(Parser, Debug)]
#[command(name = "tgbridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TGBRIDGE_CONFIG", default_value = "config/config.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "tgbridge=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        tracing::error!("Bridge failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let state = Arc::new(BridgeState::new());
    let telegram = Arc::new(TelegramBridge::new(config.telegram_chat_id));
    let shutdown = CancellationToken::new();

    // ── Telegram side ─────────────────────────────────────────────────────
    let telegram_task = telegram::start(
        config.telegram_bot_token.clone(),
        state.clone(),
        telegram.clone(),
        shutdown.clone(),
    );

    // ── Hook API ──────────────────────────────────────────────────────────
    let app = http::build_router(AppState {
        bridge: state.clone(),
        telegram: telegram.clone(),
        default_timeout_secs: config.approval_timeout_seconds,
    });
    let addr: SocketAddr = format!("{}:{}", config.bridge_host, config.bridge_port)
        .parse()
        .with_context(|| {
            format!("invalid bridge address {}:{}", config.bridge_host, config.bridge_port)
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind hook API to {}", addr))?;
    tracing::info!("🌐 Bridge API starting on http://{}", addr);

    let http_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!("Hook API server error: {}", e);
            }
            // In-flight requests are drained by now; make sure the chat side
            // follows if the server died on its own.
            shutdown.cancel();
        }
    });

    // ── Wait for a shutdown cause ─────────────────────────────────────────
    // Both tasks cancel the token themselves when they die, so either
    // server going down (or `/shutdown confirm`) is observed here.
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = shutdown_signal() => {
            tracing::info!("Termination signal received, shutting down");
            shutdown.cancel();
        }
    }

    // Pending approval latches are dropped with the state; their HTTP
    // callers observe a timeout on their side.
    let _ = tokio::join!(telegram_task, http_task);
    tracing::info!("Bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
