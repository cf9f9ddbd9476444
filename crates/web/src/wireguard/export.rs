//! Instance config export
//!
//! Explicit persistence step on top of the pure renderer: render every
//! instance's server config and write it to `{config_dir}/wg{N}.conf`.

use std::path::{Path, PathBuf};
use tracing::info;

use super::db::{ConfigFile, WireGuardDb};
use super::render::render_instance_config;

/// Render and write all instance configs. Returns the written paths in
/// instance order.
pub async fn export_instance_configs(
    db: &WireGuardDb,
    config_dir: &Path,
) -> Result<Vec<PathBuf>, String> {
    let instances = db.list_instances()?;

    tokio::fs::create_dir_all(config_dir)
        .await
        .map_err(|e| format!("Failed to create {}: {}", config_dir.display(), e))?;

    let mut written = Vec::with_capacity(instances.len());
    for instance in &instances {
        let peers = db.list_peers(instance.id)?;
        let mut peers_with_ips = Vec::with_capacity(peers.len());
        for peer in peers {
            let ips = db.list_allowed_ips(peer.id, ConfigFile::Server)?;
            peers_with_ips.push((peer, ips));
        }

        let content = render_instance_config(instance, &peers_with_ips);
        let path = config_dir.join(format!("wg{}.conf", instance.instance_id));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;

        info!("Exported instance config to {}", path.display());
        written.push(path);
    }

    Ok(written)
}
