//! # beacon-agent
//!
//! Reads JSON-lines events from stdin and hands them to the telemetry
//! service through the event bridge.
//!
//! ```text
//! $ echo '{"name":"build_finished","parameters":{"secs":42}}' | beacon-agent
//! ```
//!
//! ## Options
//! - `--config <path>`: config file (default: platform config dir)
//! - `--endpoint <host[:port]>`: collector host, persisted for later runs
//! - `--insecure`: use http instead of https for `--endpoint`
//!
//! Stops on Ctrl+C or when stdin closes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use beacon_core::DeviceFacts;
use beacon_db::{Database, DbConfig, SettingsRepository};
use beacon_sync::{event_bridge, BridgeSender, StaticDeviceInfo, TelemetryConfig, TelemetryService};

/// Settings key holding this machine's install id.
const INSTALL_ID_KEY: &str = "agent.install_id";

#[derive(Debug, Parser)]
#[command(name = "beacon-agent")]
#[command(about = "Forwards JSON-lines events from stdin to a telemetry collector", long_about = None)]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Collector host[:port], persisted for later runs
    #[arg(long)]
    endpoint: Option<String>,

    /// Use http instead of https for --endpoint
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let config = TelemetryConfig::load(args.config)?;

    let db_path = config.storage.resolved_database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = %db_path.display(), "Opening event store");
    let db = Database::new(DbConfig::new(&db_path)).await?;

    let install_id = install_id(&db.settings()).await?;
    let device = Arc::new(StaticDeviceInfo::new(install_id.clone(), host_facts()));
    info!(%install_id, "Agent identity");

    let (bridge, bridge_rx) = event_bridge(config.queue.bridge_capacity);
    let handle = TelemetryService::new(config, db.clone(), device)
        .with_bridge(bridge_rx)
        .start()
        .await?;

    if let Some(host) = args.endpoint {
        handle.set_endpoint(host, !args.insecure);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
        read = read_stdin(bridge) => {
            if let Err(e) = read {
                error!(error = %e, "Failed to read stdin");
            }
            info!("Input closed");
        }
    }

    match handle.status().await {
        Ok(status) => info!(status = %serde_json::to_string(&status)?, "Final status"),
        Err(e) => warn!(error = %e, "Status unavailable"),
    }

    handle.shutdown().await?;
    db.close().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,beacon=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Forwards each non-empty stdin line to the bridge until EOF.
async fn read_stdin(bridge: BridgeSender) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match bridge.send_json(line).await {
            Ok(()) => debug!("Event queued"),
            Err(e) => warn!(error = %e, "Skipping unreadable line"),
        }
    }

    Ok(())
}

/// Stable per-machine id, generated on first run.
async fn install_id(settings: &SettingsRepository) -> beacon_db::DbResult<String> {
    if let Some(id) = settings.get(INSTALL_ID_KEY).await? {
        return Ok(id);
    }

    let id = uuid::Uuid::new_v4().to_string();
    settings.put(INSTALL_ID_KEY, &id).await?;
    Ok(id)
}

fn host_facts() -> DeviceFacts {
    DeviceFacts {
        lib_id: Some(format!("beacon-agent/{}", env!("CARGO_PKG_VERSION"))),
        app_package: Some(env!("CARGO_PKG_NAME").to_string()),
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        os_version: Some(std::env::consts::OS.to_string()),
        device: Some(std::env::consts::ARCH.to_string()),
        locale: std::env::var("LANG").ok(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["beacon-agent"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.endpoint.is_none());
        assert!(!args.insecure);
    }

    #[test]
    fn test_args_endpoint_and_config() {
        let args = Args::try_parse_from([
            "beacon-agent",
            "--config",
            "/etc/beacon.toml",
            "--endpoint",
            "collector.local:8080",
            "--insecure",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("/etc/beacon.toml")));
        assert_eq!(args.endpoint.as_deref(), Some("collector.local:8080"));
        assert!(args.insecure);
    }

    #[test]
    fn test_args_reject_unknown_flag() {
        assert!(Args::try_parse_from(["beacon-agent", "--verbose"]).is_err());
        assert!(Args::try_parse_from(["beacon-agent", "--endpoint"]).is_err());
    }
}
