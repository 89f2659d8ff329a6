#![forbid(unsafe_code)]

//! `repl-relay` — remote evaluation session server binary.
//!
//! Bootstraps configuration and tracing, builds the session registry,
//! and serves the HTTP API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use repl_relay::http::{self, AppState};
use repl_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "repl-relay", about = "Remote evaluation session server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the sandbox root directory.
    #[arg(long)]
    sandbox_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("repl-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(root) = args.sandbox_root {
        config.sandbox_root = root;
    }

    std::fs::create_dir_all(&config.sandbox_root)
        .map_err(|err| AppError::Config(format!("cannot create sandbox root: {err}")))?;

    let config = Arc::new(config);
    info!(
        sandbox_root = %config.sandbox_root.display(),
        engine = %config.engine_command,
        "configuration loaded"
    );

    // ── Serve until shutdown ────────────────────────────
    let state = AppState::new(Arc::clone(&config));
    let ct = CancellationToken::new();

    let server_ct = ct.clone();
    let server = tokio::spawn(http::serve(state.clone(), server_ct));

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let result = match server.await {
        Ok(res) => res,
        Err(err) => Err(AppError::Config(format!("server task panicked: {err}"))),
    };

    // ── Terminate remaining sessions ────────────────────
    // Engines carry kill_on_drop as a backstop, but an orderly exit
    // gives each one its grace period.
    let live = state.registry.drain_all().await;
    if !live.is_empty() {
        info!(count = live.len(), "terminating remaining sessions");
        for session in live {
            session.terminate(std::time::Duration::ZERO).await;
        }
    }

    info!("repl-relay shut down");
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
