//! # rollcall
//!
//! Presence and signaling relay binary. Loads settings, initializes
//! telemetry, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_server::RollcallServer;
use rollcall_settings::{LoggingSettings, RollcallSettings};
use rollcall_telemetry::{TelemetryConfig, init_telemetry};
use tracing::Level;

/// How long in-flight sessions get to close after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Rollcall relay server.
#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    about = "Ephemeral identities and real-time relay for connected peers"
)]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.rollcall/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load layered settings and apply CLI flags on top.
    fn resolve_settings(&self) -> Result<RollcallSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(rollcall_settings::settings_path);
        let mut settings = rollcall_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

/// Map logging settings onto the telemetry config. Unparseable levels fall
/// back to `info` and are skipped for module overrides.
fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: Level::from_str(&logging.level).unwrap_or(Level::INFO),
        module_levels: logging
            .module_levels
            .iter()
            .filter_map(|(module, level)| Level::from_str(level).ok().map(|l| (module.clone(), l)))
            .collect(),
        json: logging.json,
        metrics_enabled: true,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    let telemetry = init_telemetry(&telemetry_config(&settings.logging));

    let server = RollcallServer::new(&settings, telemetry.metrics_handle().cloned());
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        identities = settings.identities.labels.len(),
        policy = ?settings.server.duplicate_peer_policy,
        "rollcall listening on ws://{addr}/api/ws/{{user_id}}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!(sessions = server.manager().len(), "Shutting down...");
    server.shutdown_gracefully(handle, SHUTDOWN_TIMEOUT).await;
    Ok(())
}
