//! WireGuard Console
//!
//! Web admin console for WireGuard VPN servers: instance and peer
//! management, config rendering and export, QR-code download for mobile
//! clients, and wg-quick interface restart orchestration.

pub mod auth;
pub mod server;
pub mod wireguard;

pub use server::{build_router, build_state, serve, ConsoleConfig};
pub use wireguard::{WireGuardDb, WireGuardInstance};
