//! # magicsocketd
//!
//! Standalone magicsocket server: loads settings, installs logging and the
//! Prometheus recorder, admits clients by query parameters, and exposes
//! `POST /emit` for pushing JSON to connected clients.

#![deny(unsafe_code)]

mod admin;
mod auth;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use magicsocket_core::logging;
use magicsocket_server::metrics::install_recorder;
use magicsocket_server::{MagicSocketServer, ServerConfig};
use magicsocket_settings::MagicSocketSettings;

/// Time allowed for the accept loop to wind down after stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// magicsocket server.
#[derive(Parser, Debug)]
#[command(name = "magicsocketd", about = "In-process pub/sub over WebSockets")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// HTTP path accepting WebSocket upgrades (overrides settings).
    #[arg(long)]
    path: Option<String>,

    /// Settings file (default `~/.magicsocket/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or `EnvFilter` directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<MagicSocketSettings> {
        let mut settings = match &self.settings {
            Some(path) => magicsocket_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => magicsocket_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.path {
            settings.server.path.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        magicsocket_settings::validate(&settings).context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if settings.logging.json {
        logging::init_json_subscriber(&settings.logging.level);
    } else {
        logging::init_subscriber(&settings.logging.level);
    }

    let config = ServerConfig::from(&settings);
    let mut server = MagicSocketServer::new(config, auth::authorize);
    match install_recorder() {
        Some(handle) => server = server.with_metrics(handle),
        None => tracing::warn!("metrics recorder unavailable, /metrics disabled"),
    }
    let server = Arc::new(server);

    let (addr, handle) = server
        .listen_with(admin::router(Arc::clone(&server)))
        .await
        .context("Failed to bind server")?;
    tracing::info!(
        "magicsocketd listening on ws://{addr}{} (policy: {})",
        server.config().path,
        server.config().hook_failure_policy
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await;
    server.shutdown().drain(vec![handle], Some(DRAIN_TIMEOUT)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
