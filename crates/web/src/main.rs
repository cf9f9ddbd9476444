use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use wgconsole_web::server::{ConsoleConfig, DEFAULT_CMD_TIMEOUT_SECS, DEFAULT_CONFIG_DIR, DEFAULT_DNS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("WGCONSOLE_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let db_path = std::env::var("WGCONSOLE_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| wgconsole_common::default_db_path());

    let config_dir = std::env::var("WGCONSOLE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

    let wg_quick = std::env::var("WGCONSOLE_WG_QUICK")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("wg-quick"));

    let command_timeout = std::env::var("WGCONSOLE_CMD_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_CMD_TIMEOUT_SECS));

    let default_dns =
        std::env::var("WGCONSOLE_DNS").unwrap_or_else(|_| DEFAULT_DNS.to_string());

    let bootstrap_admin_password = std::env::var("WGCONSOLE_BOOTSTRAP_ADMIN_PASSWORD")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let cfg = ConsoleConfig {
        db_path,
        config_dir,
        wg_quick,
        command_timeout,
        default_dns,
        bootstrap_admin_password,
    };

    info!(
        "Starting WireGuard Console on http://{} (configs: {})",
        addr,
        cfg.config_dir.display()
    );

    wgconsole_web::server::serve(addr, cfg).await
}
