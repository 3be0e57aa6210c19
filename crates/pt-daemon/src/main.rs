//! padterm daemon: serves a browser-reachable shell over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pt_bridge::{api_router, ApiState};
use pt_core::config::Config;
use pt_core::shutdown::ShutdownSignal;
use pt_telemetry::LogFormat;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// padterm -- interactive shell sessions over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "padterm", version, about)]
struct Cli {
    /// Path to a TOML config file (default: ~/.padterm/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on; falls back to $PORT.
    #[arg(short, long)]
    port: Option<u16>,

    /// Shell to launch for every session.
    #[arg(long)]
    shell: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    apply_overrides(&mut config, &cli, std::env::var("PORT").ok().as_deref())?;

    pt_telemetry::init(
        "padterm",
        &config.general.log_level,
        LogFormat::from_json_flag(config.general.json_logs),
    );
    info!(version = env!("CARGO_PKG_VERSION"), "padterm starting");

    let shutdown = ShutdownSignal::new();
    let state = Arc::new(ApiState::from_config(&config, shutdown.clone()));
    let registry = state.registry.clone();
    let app = api_router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        shell = %config.terminal.shell,
        history = %config.history.resolved_path().display(),
        "listening on ws://{addr}/ws/terminal"
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        signal.trigger();
    });

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.wait().await;
    });
    let served = server.await;

    registry.shutdown_all();
    info!("padterm stopped");
    served.context("server error")
}

/// Layer command-line flags (and `$PORT`) over the loaded config.
fn apply_overrides(config: &mut Config, cli: &Cli, env_port: Option<&str>) -> Result<()> {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    } else if let Some(raw) = env_port {
        config.server.port = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid PORT value {raw:?}"))?;
    }
    if let Some(shell) = &cli.shell {
        config.terminal.shell = shell.clone();
    }
    if cli.json_logs {
        config.general.json_logs = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(())
}
