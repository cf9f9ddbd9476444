//! WireGuard administration console
//!
//! This module implements the WireGuard side of the console:
//! - Instance, peer, and allowed-IP management
//! - Pure config rendering for server and peer configs
//! - Config export to the wg-quick config directory
//! - QR-code export for mobile clients
//! - Interface restart orchestration via wg-quick

pub mod db;
pub mod export;
pub mod keys;
pub mod qr;
pub mod render;
pub mod restart;
pub mod routes;

pub use db::{ConfigFile, Peer, PeerAllowedIP, WireGuardDb, WireGuardInstance};
pub use export::export_instance_configs;
pub use keys::generate_wireguard_keypair;
pub use render::{render_instance_config, render_peer_config, RenderError};
pub use restart::{RestartOrchestrator, RestartReport, RestartSummary};
pub use routes::{wireguard_router, AppState, FlashMessage};
