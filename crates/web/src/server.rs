//! Web server implementation

use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use wgconsole_common::Database;

use crate::auth::{AuthDb, LEVEL_MANAGE};
use crate::wireguard::restart::RestartOrchestrator;
use crate::wireguard::routes::{wireguard_router, AppState};
use crate::wireguard::WireGuardDb;

/// Default wg-quick config directory
pub const DEFAULT_CONFIG_DIR: &str = "/etc/wireguard";
/// Default per-command timeout for wg-quick invocations
pub const DEFAULT_CMD_TIMEOUT_SECS: u64 = 30;
/// Default DNS server for new instances
pub const DEFAULT_DNS: &str = "8.8.8.8";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub db_path: PathBuf,
    pub config_dir: PathBuf,
    pub wg_quick: PathBuf,
    pub command_timeout: Duration,
    pub default_dns: String,
    /// Password for a bootstrap admin user, created only when no users exist.
    pub bootstrap_admin_password: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            db_path: wgconsole_common::default_db_path(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            wg_quick: PathBuf::from("wg-quick"),
            command_timeout: Duration::from_secs(DEFAULT_CMD_TIMEOUT_SECS),
            default_dns: DEFAULT_DNS.to_string(),
            bootstrap_admin_password: None,
        }
    }
}

/// Build the console state from config: open the database, initialize the
/// schemas, and bootstrap the admin user if requested.
pub fn build_state(cfg: &ConsoleConfig) -> anyhow::Result<Arc<AppState>> {
    if let Some(parent) = cfg.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Database::open(&cfg.db_path)?;

    let db = WireGuardDb::new(store.clone());
    db.init_schema()
        .map_err(|e| anyhow::anyhow!("WireGuard schema init failed: {}", e))?;

    let auth = AuthDb::new(store.clone());
    auth.init_schema()
        .map_err(|e| anyhow::anyhow!("Auth schema init failed: {}", e))?;

    bootstrap_admin(&auth, cfg.bootstrap_admin_password.as_deref())
        .map_err(|e| anyhow::anyhow!("Admin bootstrap failed: {}", e))?;

    let expired = auth
        .cleanup_expired_sessions()
        .map_err(|e| anyhow::anyhow!("Session cleanup failed: {}", e))?;
    if expired > 0 {
        info!("Removed {} expired sessions", expired);
    }

    Ok(Arc::new(AppState {
        db,
        auth,
        store,
        config_dir: cfg.config_dir.clone(),
        default_dns: cfg.default_dns.clone(),
        restart: RestartOrchestrator::new(&cfg.wg_quick, &cfg.config_dir, cfg.command_timeout),
    }))
}

/// Create the initial admin user when the user table is empty.
fn bootstrap_admin(auth: &AuthDb, password: Option<&str>) -> Result<(), String> {
    if auth.count_users()? > 0 {
        return Ok(());
    }
    match password {
        Some(password) if !password.trim().is_empty() => {
            auth.create_user("admin", password, LEVEL_MANAGE)?;
            info!("Bootstrapped admin user");
        }
        _ => {
            warn!("No users exist and no bootstrap password configured; API is unusable until a user is created");
        }
    }
    Ok(())
}

/// Assemble the full router: health endpoint plus the console API under /api.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .nest("/api", wireguard_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": wgconsole_common::VERSION,
    }))
}

/// Run the server until shutdown.
pub async fn serve(addr: SocketAddr, cfg: ConsoleConfig) -> anyhow::Result<()> {
    let state = build_state(&cfg)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Console listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConsoleConfig {
            db_path: dir.path().join("console.db"),
            config_dir: dir.path().to_path_buf(),
            wg_quick: PathBuf::from("true"),
            command_timeout: Duration::from_secs(1),
            default_dns: DEFAULT_DNS.to_string(),
            bootstrap_admin_password: None,
        };
        let app = build_router(build_state(&cfg).unwrap());

        let response = app
            .oneshot(
                axum::http::Request::get("/healthz")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_bootstrap_admin_once() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConsoleConfig {
            db_path: dir.path().join("console.db"),
            config_dir: dir.path().to_path_buf(),
            wg_quick: PathBuf::from("true"),
            command_timeout: Duration::from_secs(1),
            default_dns: DEFAULT_DNS.to_string(),
            bootstrap_admin_password: Some("hunter2".to_string()),
        };

        let state = build_state(&cfg).unwrap();
        assert_eq!(state.auth.count_users().unwrap(), 1);
        let admin = state.auth.verify_login("admin", "hunter2").unwrap().unwrap();
        assert!(admin.has_minimum_level(LEVEL_MANAGE));

        // Re-opening the same database must not create a second admin.
        let state = build_state(&cfg).unwrap();
        assert_eq!(state.auth.count_users().unwrap(), 1);
    }
}
