use anyhow::{Context, Result};
use clap::Parser;
use od_core::clock::system_clock;
use od_core::config::DeskConfig;
use od_extension::ProcessTransport;
use od_server::{app_with_state, state::AppState};
use od_session::Maintenance;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "officedesk")]
#[command(about = "Remote operation server for office documents", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "OFFICEDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding [server] host/port
    #[arg(long, env = "OFFICEDESK_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DeskConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DeskConfig::default(),
    };
    let addr = match args.bind {
        Some(addr) => addr,
        None => format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("invalid [server] host/port")?,
    };

    let state = AppState::build(&config, Arc::new(ProcessTransport::new()), system_clock())
        .await
        .context("initializing stores")?;
    state.extensions().probe_all().await;

    let period = Duration::from_secs(config.recovery.sweep_interval_secs.max(1));
    let maintenance = Maintenance::new(state.sessions.clone()).spawn(period);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, extensions = config.extensions.len(), "officedesk listening");

    axum::serve(listener, app_with_state(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    maintenance.stop();
    let disconnected = state.sessions.disconnect_all().await;
    state.extensions().shutdown().await;
    tracing::info!(disconnected, "officedesk stopped");
    Ok(())
}
