//! Console API routes
//!
//! Instance/peer/allowed-IP CRUD, peer config download (conf or QR),
//! instance config export, and interface restart. Download requires user
//! level 20; export, restart, and all mutation require level 30.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use wgconsole_common::Database;

use crate::auth::{get_current_user, AuthDb, User, LEVEL_DOWNLOAD, LEVEL_MANAGE};
use crate::wireguard::db::{ConfigFile, Peer, PeerAllowedIP, WireGuardDb, WireGuardInstance};
use crate::wireguard::export::export_instance_configs;
use crate::wireguard::keys::generate_wireguard_keypair;
use crate::wireguard::qr::config_png;
use crate::wireguard::render::{render_peer_config, RenderError};
use crate::wireguard::restart::{RestartOrchestrator, RestartReport, RestartSummary};

// ============================================================================
// State
// ============================================================================

/// Console API state
pub struct AppState {
    pub db: WireGuardDb,
    pub auth: AuthDb,
    pub store: Database,
    pub config_dir: PathBuf,
    /// DNS server written into new instances unless the request sets one.
    pub default_dns: String,
    pub restart: RestartOrchestrator,
}

// ============================================================================
// User-facing messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Info,
}

/// A (title, body, severity) triple surfaced to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct FlashMessage {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

impl FlashMessage {
    pub fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: Severity::Success,
        }
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: Severity::Warning,
        }
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            severity: Severity::Info,
        }
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    expires_at: i64,
    user: User,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceRequest {
    name: Option<String>,
    address: String,
    #[serde(default = "default_netmask")]
    netmask: u8,
    #[serde(default = "default_listen_port")]
    listen_port: u16,
    hostname: String,
    post_up: Option<String>,
    post_down: Option<String>,
    dns_primary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateInstanceRequest {
    name: String,
    address: String,
    netmask: u8,
    listen_port: u16,
    hostname: String,
    post_up: Option<String>,
    post_down: Option<String>,
    dns_primary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePeerRequest {
    name: String,
    #[serde(default = "default_keepalive")]
    persistent_keepalive: u16,
    preshared_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddAllowedIpRequest {
    allowed_ip: String,
    netmask: u8,
    #[serde(default)]
    priority: u32,
    #[serde(default)]
    config_file: ConfigFile,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default = "default_format")]
    format: String,
}

#[derive(Debug, Deserialize)]
struct AllowedIpQuery {
    #[serde(default)]
    config_file: ConfigFile,
}

#[derive(Debug, Serialize)]
struct ExportResponse {
    written: Vec<String>,
    message: FlashMessage,
}

#[derive(Debug, Serialize)]
struct RestartResponse {
    #[serde(flatten)]
    report: RestartReport,
    messages: Vec<FlashMessage>,
}

fn default_netmask() -> u8 {
    24
}

fn default_listen_port() -> u16 {
    51820
}

fn default_keepalive() -> u16 {
    25
}

fn default_format() -> String {
    "conf".to_string()
}

// ============================================================================
// Router
// ============================================================================

/// The console API router, nested under /api by the server.
pub fn wireguard_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Auth
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/me", get(me_handler))
        // Instances
        .route("/instances", post(create_instance_handler).get(list_instances_handler))
        .route(
            "/instances/:id",
            get(get_instance_handler)
                .put(update_instance_handler)
                .delete(delete_instance_handler),
        )
        // Peers
        .route(
            "/instances/:id/peers",
            post(create_peer_handler).get(list_peers_handler),
        )
        .route("/peers/:id", get(get_peer_handler).delete(delete_peer_handler))
        // Allowed IPs
        .route(
            "/peers/:id/allowed-ips",
            post(add_allowed_ip_handler).get(list_allowed_ips_handler),
        )
        .route("/allowed-ips/:id", delete(delete_allowed_ip_handler))
        // Config download / export / restart
        .route("/peers/:id/config", get(download_peer_config_handler))
        .route("/configs/export", post(export_configs_handler))
        .route("/interfaces/restart", post(restart_interfaces_handler))
        .with_state(state)
}

// ============================================================================
// Auth helpers
// ============================================================================

/// Resolve the caller and require a minimum access level.
fn require_level(
    state: &AppState,
    headers: &HeaderMap,
    threshold: i64,
) -> Result<User, Response> {
    match get_current_user(&state.auth, headers) {
        Ok(user) if user.has_minimum_level(threshold) => Ok(user),
        Ok(_) => Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Access denied"})),
        )
            .into_response()),
        Err(status) => Err((
            status,
            Json(serde_json::json!({"error": "Unauthorized"})),
        )
            .into_response()),
    }
}

fn parse_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid ID"})),
        )
            .into_response()
    })
}

fn internal_error(e: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": e})),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("{} not found", what)})),
    )
        .into_response()
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ============================================================================
// Auth handlers
// ============================================================================

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let user = match state.auth.verify_login(&req.username, &req.password) {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid credentials"})),
            )
                .into_response()
        }
        Err(e) => return internal_error(e),
    };

    match state.auth.create_session(user.id) {
        Ok(session) => (
            StatusCode::OK,
            Json(LoginResponse {
                token: session.token,
                expires_at: session.expires_at,
                user,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = crate::auth::extract_token(&headers) {
        let _ = state.auth.delete_session(&token);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn me_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match get_current_user(&state.auth, &headers) {
        Ok(user) => (StatusCode::OK, Json(serde_json::json!({"user": user}))).into_response(),
        Err(_) => (StatusCode::OK, Json(serde_json::json!({"user": null}))).into_response(),
    }
}

// ============================================================================
// Instance handlers
// ============================================================================

async fn create_instance_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateInstanceRequest>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }

    if req.address.trim().is_empty() || req.hostname.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "address and hostname are required"})),
        )
            .into_response();
    }

    let instance_id = match state.db.next_instance_id() {
        Ok(id) => id,
        Err(e) => return internal_error(e),
    };
    let keypair = generate_wireguard_keypair();

    let instance = WireGuardInstance {
        id: Uuid::new_v4(),
        instance_id,
        name: req.name.unwrap_or_else(|| format!("wg{}", instance_id)),
        address: req.address,
        netmask: req.netmask,
        listen_port: req.listen_port,
        private_key: keypair.private_key,
        public_key: keypair.public_key,
        hostname: req.hostname,
        post_up: req.post_up,
        post_down: req.post_down,
        dns_primary: req.dns_primary.unwrap_or_else(|| state.default_dns.clone()),
        created_at: now_epoch_secs(),
    };

    match state.db.create_instance(&instance) {
        Ok(()) => (StatusCode::CREATED, Json(instance)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e}))).into_response(),
    }
}

async fn list_instances_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    match state.db.list_instances() {
        Ok(instances) => {
            (StatusCode::OK, Json(serde_json::json!({"instances": instances}))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn get_instance_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.get_instance(id) {
        Ok(Some(instance)) => (StatusCode::OK, Json(instance)).into_response(),
        Ok(None) => not_found("Instance"),
        Err(e) => internal_error(e),
    }
}

async fn update_instance_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateInstanceRequest>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let mut instance = match state.db.get_instance(id) {
        Ok(Some(instance)) => instance,
        Ok(None) => return not_found("Instance"),
        Err(e) => return internal_error(e),
    };

    instance.name = req.name;
    instance.address = req.address;
    instance.netmask = req.netmask;
    instance.listen_port = req.listen_port;
    instance.hostname = req.hostname;
    instance.post_up = req.post_up;
    instance.post_down = req.post_down;
    if let Some(dns) = req.dns_primary {
        instance.dns_primary = dns;
    }

    match state.db.update_instance(&instance) {
        Ok(()) => (StatusCode::OK, Json(instance)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_instance_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.delete_instance(id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("Instance"),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Peer handlers
// ============================================================================

async fn create_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CreatePeerRequest>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let instance_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if req.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Name is required"})),
        )
            .into_response();
    }

    match state.db.get_instance(instance_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Instance"),
        Err(e) => return internal_error(e),
    }

    let keypair = generate_wireguard_keypair();
    let peer = Peer {
        id: Uuid::new_v4(),
        instance_id,
        name: req.name,
        private_key: Some(keypair.private_key),
        public_key: keypair.public_key,
        preshared_key: req.preshared_key,
        persistent_keepalive: req.persistent_keepalive,
        created_at: now_epoch_secs(),
    };

    match state.db.create_peer(&peer) {
        Ok(()) => (StatusCode::CREATED, Json(peer)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e}))).into_response(),
    }
}

async fn list_peers_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    let instance_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.list_peers(instance_id) {
        Ok(peers) => (StatusCode::OK, Json(serde_json::json!({"peers": peers}))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.get_peer(id) {
        Ok(Some(peer)) => (StatusCode::OK, Json(peer)).into_response(),
        Ok(None) => not_found("Peer"),
        Err(e) => internal_error(e),
    }
}

async fn delete_peer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.delete_peer(id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("Peer"),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Allowed-IP handlers
// ============================================================================

async fn add_allowed_ip_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AddAllowedIpRequest>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let peer_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.db.get_peer(peer_id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("Peer"),
        Err(e) => return internal_error(e),
    }

    let ip = PeerAllowedIP {
        id: Uuid::new_v4(),
        peer_id,
        allowed_ip: req.allowed_ip,
        netmask: req.netmask,
        priority: req.priority,
        config_file: req.config_file,
        created_at: now_epoch_secs(),
    };

    match state.db.add_allowed_ip(&ip) {
        Ok(()) => (StatusCode::CREATED, Json(ip)).into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(serde_json::json!({"error": e}))).into_response(),
    }
}

async fn list_allowed_ips_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<AllowedIpQuery>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    let peer_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.list_allowed_ips(peer_id, query.config_file) {
        Ok(ips) => (StatusCode::OK, Json(serde_json::json!({"allowed_ips": ips}))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn delete_allowed_ip_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.delete_allowed_ip(id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("Allowed IP"),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Config download / export / restart handlers
// ============================================================================

async fn download_peer_config_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_DOWNLOAD) {
        return resp;
    }
    let peer_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let peer = match state.db.get_peer(peer_id) {
        Ok(Some(peer)) => peer,
        Ok(None) => return not_found("Peer"),
        Err(e) => return internal_error(e),
    };
    let instance = match state.db.get_instance(peer.instance_id) {
        Ok(Some(instance)) => instance,
        Ok(None) => return not_found("Instance"),
        Err(e) => return internal_error(e),
    };
    let allowed_ips = match state.db.list_allowed_ips(peer_id, ConfigFile::Server) {
        Ok(ips) => ips,
        Err(e) => return internal_error(e),
    };

    let config = match render_peer_config(&instance, &peer, &allowed_ips) {
        Ok(config) => config,
        Err(RenderError::MissingPriorityZeroIp { .. }) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FlashMessage::warning(
                    "Config not available",
                    format!("No IP with priority zero found for peer {}", peer_id),
                )),
            )
                .into_response();
        }
    };

    match query.format.as_str() {
        "qrcode" => match config_png(&config) {
            Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
            Err(e) => internal_error(e),
        },
        _ => (
            [
                (
                    header::CONTENT_TYPE,
                    "text/plain; charset=utf-8".to_string(),
                ),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"peer_{}.conf\"", peer_id),
                ),
            ],
            config,
        )
            .into_response(),
    }
}

async fn export_configs_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }

    match export_instance_configs(&state.db, &state.config_dir).await {
        Ok(written) => {
            if let Err(e) = state
                .store
                .kv_set("last_export_at", &now_epoch_secs().to_string())
            {
                warn!("Failed to record export time: {}", e);
            }
            let message = FlashMessage::success(
                "Export successful!",
                format!(
                    "WireGuard configuration files have been exported to {}. Don't forget to restart the interfaces.",
                    state.config_dir.display()
                ),
            );
            (
                StatusCode::OK,
                Json(ExportResponse {
                    written: written.iter().map(|p| p.display().to_string()).collect(),
                    message,
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FlashMessage::warning("Export failed", e)),
        )
            .into_response(),
    }
}

async fn restart_interfaces_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_level(&state, &headers, LEVEL_MANAGE) {
        return resp;
    }

    let report = match state.restart.restart_all().await {
        Ok(report) => report,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(FlashMessage::warning("Restart failed", e)),
            )
                .into_response()
        }
    };

    let messages = restart_messages(&report);
    (
        StatusCode::OK,
        Json(RestartResponse { report, messages }),
    )
        .into_response()
}

/// Map a restart report to operator-facing messages.
fn restart_messages(report: &RestartReport) -> Vec<FlashMessage> {
    let mut messages = Vec::new();

    for iface in &report.interfaces {
        for failure in &iface.failures {
            let verb = match failure.phase {
                crate::wireguard::restart::RestartPhase::Down => "stopping",
                crate::wireguard::restart::RestartPhase::Up => "starting",
            };
            messages.push(FlashMessage::warning(
                format!("Error {} {}", verb, iface.interface),
                failure.detail.clone(),
            ));
        }
    }

    match &report.summary {
        RestartSummary::AllRestarted { count: 1 } => messages.push(FlashMessage::success(
            "Interface restarted",
            "The WireGuard interface has been restarted.",
        )),
        RestartSummary::AllRestarted { count } => messages.push(FlashMessage::success(
            "Interfaces restarted",
            format!("{} WireGuard interfaces have been restarted.", count),
        )),
        RestartSummary::SomeErrors { .. } => messages.push(FlashMessage::warning(
            "Errors encountered",
            "There were errors restarting some interfaces. See warnings for details.",
        )),
        RestartSummary::NoneFound => messages.push(FlashMessage::info(
            "No interfaces found",
            "No WireGuard interfaces were found to restart.",
        )),
    }

    messages
}
