//! WireGuard database schema and operations
//!
//! Tables:
//! - wg_instances: WireGuard instance (server interface) records
//! - wg_peers: Peers belonging to an instance
//! - wg_peer_allowed_ips: Allowed-IP rows per peer
//!
//! The renderer and the restart orchestrator are pure readers of these
//! tables; all mutation happens through the CRUD operations here.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use wgconsole_common::Database;

/// WireGuard database wrapper
#[derive(Clone)]
pub struct WireGuardDb {
    db: Database,
}

// ============================================================================
// Instance types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardInstance {
    pub id: Uuid,
    /// Small integer naming the host interface (`wg{instance_id}`)
    pub instance_id: u32,
    pub name: String,
    pub address: String,
    pub netmask: u8,
    pub listen_port: u16,
    pub private_key: String,
    pub public_key: String,
    pub hostname: String,
    pub post_up: Option<String>,
    pub post_down: Option<String>,
    pub dns_primary: String,
    pub created_at: i64,
}

// ============================================================================
// Peer types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub name: String,
    pub private_key: Option<String>,
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub persistent_keepalive: u16,
    pub created_at: i64,
}

// ============================================================================
// Allowed-IP types
// ============================================================================

/// Which generated config an allowed-IP row appears in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFile {
    Server,
    Client,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::Server
    }
}

impl std::fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

impl std::str::FromStr for ConfigFile {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            _ => Err(format!("unknown config file target: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAllowedIP {
    pub id: Uuid,
    pub peer_id: Uuid,
    pub allowed_ip: String,
    pub netmask: u8,
    /// Priority 0 designates the peer's own tunnel address; higher
    /// priorities are additional routed subnets.
    pub priority: u32,
    pub config_file: ConfigFile,
    pub created_at: i64,
}

// ============================================================================
// Database implementation
// ============================================================================

impl WireGuardDb {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Initialize WireGuard schema
    pub fn init_schema(&self) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute_batch(
            r#"
            -- Instances
            CREATE TABLE IF NOT EXISTS wg_instances (
                id TEXT PRIMARY KEY,
                instance_id INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                netmask INTEGER NOT NULL,
                listen_port INTEGER NOT NULL,
                private_key TEXT NOT NULL,
                public_key TEXT NOT NULL,
                hostname TEXT NOT NULL,
                post_up TEXT,
                post_down TEXT,
                dns_primary TEXT NOT NULL DEFAULT '8.8.8.8',
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wg_instances_instance_id ON wg_instances(instance_id);

            -- Peers
            CREATE TABLE IF NOT EXISTS wg_peers (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                name TEXT NOT NULL,
                private_key TEXT,
                public_key TEXT NOT NULL,
                preshared_key TEXT,
                persistent_keepalive INTEGER NOT NULL DEFAULT 25,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(instance_id) REFERENCES wg_instances(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_wg_peers_instance ON wg_peers(instance_id);

            -- Allowed IPs
            CREATE TABLE IF NOT EXISTS wg_peer_allowed_ips (
                id TEXT PRIMARY KEY,
                peer_id TEXT NOT NULL,
                allowed_ip TEXT NOT NULL,
                netmask INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                config_file TEXT NOT NULL DEFAULT 'server',
                created_at INTEGER NOT NULL,
                FOREIGN KEY(peer_id) REFERENCES wg_peers(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_wg_peer_ips_peer ON wg_peer_allowed_ips(peer_id);

            -- At most one priority-0 row per (peer, config_file)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_wg_peer_ips_priority_zero
                ON wg_peer_allowed_ips(peer_id, config_file) WHERE priority = 0;
            "#,
        )
        .map_err(|e| e.to_string())?;

        info!("WireGuard database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Instance operations
    // ========================================================================

    pub fn create_instance(&self, instance: &WireGuardInstance) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO wg_instances (id, instance_id, name, address, netmask, listen_port, private_key, public_key, hostname, post_up, post_down, dns_primary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                instance.id.to_string(),
                instance.instance_id,
                instance.name,
                instance.address,
                instance.netmask,
                instance.listen_port,
                instance.private_key,
                instance.public_key,
                instance.hostname,
                instance.post_up.as_ref(),
                instance.post_down.as_ref(),
                instance.dns_primary,
                instance.created_at,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_instance(&self, id: Uuid) -> Result<Option<WireGuardInstance>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, instance_id, name, address, netmask, listen_port, private_key, public_key, hostname, post_up, post_down, dns_primary, created_at
             FROM wg_instances WHERE id = ?1",
            params![id.to_string()],
            instance_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    /// Instances ordered by their interface number, so export and listing
    /// order is stable.
    pub fn list_instances(&self) -> Result<Vec<WireGuardInstance>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, instance_id, name, address, netmask, listen_port, private_key, public_key, hostname, post_up, post_down, dns_primary, created_at
                 FROM wg_instances ORDER BY instance_id ASC",
            )
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map([], instance_from_row)
            .map_err(|e| e.to_string())?;

        let mut instances = Vec::new();
        for row in rows {
            instances.push(row.map_err(|e| e.to_string())?);
        }
        Ok(instances)
    }

    pub fn update_instance(&self, instance: &WireGuardInstance) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn
            .execute(
                "UPDATE wg_instances SET name = ?1, address = ?2, netmask = ?3, listen_port = ?4, hostname = ?5, post_up = ?6, post_down = ?7, dns_primary = ?8 WHERE id = ?9",
                params![
                    instance.name,
                    instance.address,
                    instance.netmask,
                    instance.listen_port,
                    instance.hostname,
                    instance.post_up.as_ref(),
                    instance.post_down.as_ref(),
                    instance.dns_primary,
                    instance.id.to_string(),
                ],
            )
            .map_err(|e| e.to_string())?;
        if rows == 0 {
            return Err(format!("Instance {} not found", instance.id));
        }
        Ok(())
    }

    pub fn delete_instance(&self, id: Uuid) -> Result<bool, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn
            .execute("DELETE FROM wg_instances WHERE id = ?1", params![id.to_string()])
            .map_err(|e| e.to_string())?;
        Ok(rows > 0)
    }

    /// Next free interface number for a new instance (wg0, wg1, ...)
    pub fn next_instance_id(&self) -> Result<u32, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let max: Option<u32> = conn
            .query_row("SELECT MAX(instance_id) FROM wg_instances", [], |row| row.get(0))
            .map_err(|e| e.to_string())?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    // ========================================================================
    // Peer operations
    // ========================================================================

    pub fn create_peer(&self, peer: &Peer) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO wg_peers (id, instance_id, name, private_key, public_key, preshared_key, persistent_keepalive, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                peer.id.to_string(),
                peer.instance_id.to_string(),
                peer.name,
                peer.private_key.as_ref(),
                peer.public_key,
                peer.preshared_key.as_ref(),
                peer.persistent_keepalive,
                peer.created_at,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_peer(&self, id: Uuid) -> Result<Option<Peer>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, instance_id, name, private_key, public_key, preshared_key, persistent_keepalive, created_at
             FROM wg_peers WHERE id = ?1",
            params![id.to_string()],
            peer_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    /// Peers of an instance in creation order; ties broken by id so that
    /// rendering the same snapshot twice emits identical peer blocks.
    pub fn list_peers(&self, instance_id: Uuid) -> Result<Vec<Peer>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, instance_id, name, private_key, public_key, preshared_key, persistent_keepalive, created_at
                 FROM wg_peers WHERE instance_id = ?1 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map(params![instance_id.to_string()], peer_from_row)
            .map_err(|e| e.to_string())?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row.map_err(|e| e.to_string())?);
        }
        Ok(peers)
    }

    pub fn delete_peer(&self, id: Uuid) -> Result<bool, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn
            .execute("DELETE FROM wg_peers WHERE id = ?1", params![id.to_string()])
            .map_err(|e| e.to_string())?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Allowed-IP operations
    // ========================================================================

    pub fn add_allowed_ip(&self, ip: &PeerAllowedIP) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO wg_peer_allowed_ips (id, peer_id, allowed_ip, netmask, priority, config_file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ip.id.to_string(),
                ip.peer_id.to_string(),
                ip.allowed_ip,
                ip.netmask,
                ip.priority,
                ip.config_file.to_string(),
                ip.created_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                format!(
                    "Peer {} already has a priority-0 {} address",
                    ip.peer_id, ip.config_file
                )
            }
            other => other.to_string(),
        })?;
        Ok(())
    }

    /// All allowed-IP rows of a peer for one config target, ascending by
    /// priority (including priority 0).
    pub fn list_allowed_ips(
        &self,
        peer_id: Uuid,
        config_file: ConfigFile,
    ) -> Result<Vec<PeerAllowedIP>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, peer_id, allowed_ip, netmask, priority, config_file, created_at
                 FROM wg_peer_allowed_ips WHERE peer_id = ?1 AND config_file = ?2
                 ORDER BY priority ASC, created_at ASC, id ASC",
            )
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map(
                params![peer_id.to_string(), config_file.to_string()],
                allowed_ip_from_row,
            )
            .map_err(|e| e.to_string())?;

        let mut ips = Vec::new();
        for row in rows {
            ips.push(row.map_err(|e| e.to_string())?);
        }
        Ok(ips)
    }

    /// The peer's own tunnel address row, if any.
    pub fn priority_zero_ip(&self, peer_id: Uuid) -> Result<Option<PeerAllowedIP>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, peer_id, allowed_ip, netmask, priority, config_file, created_at
             FROM wg_peer_allowed_ips WHERE peer_id = ?1 AND config_file = 'server' AND priority = 0",
            params![peer_id.to_string()],
            allowed_ip_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn delete_allowed_ip(&self, id: Uuid) -> Result<bool, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM wg_peer_allowed_ips WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| e.to_string())?;
        Ok(rows > 0)
    }
}

// ============================================================================
// Row mappers
// ============================================================================

fn instance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WireGuardInstance> {
    Ok(WireGuardInstance {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        instance_id: row.get(1)?,
        name: row.get(2)?,
        address: row.get(3)?,
        netmask: row.get(4)?,
        listen_port: row.get(5)?,
        private_key: row.get(6)?,
        public_key: row.get(7)?,
        hostname: row.get(8)?,
        post_up: row.get(9)?,
        post_down: row.get(10)?,
        dns_primary: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn peer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    Ok(Peer {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        instance_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap(),
        name: row.get(2)?,
        private_key: row.get(3)?,
        public_key: row.get(4)?,
        preshared_key: row.get(5)?,
        persistent_keepalive: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn allowed_ip_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerAllowedIP> {
    Ok(PeerAllowedIP {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        peer_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap(),
        allowed_ip: row.get(2)?,
        netmask: row.get(3)?,
        priority: row.get(4)?,
        config_file: row.get::<_, String>(5)?.parse().unwrap_or_default(),
        created_at: row.get(6)?,
    })
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ============================================================================
// Test fixtures (shared with render/export tests)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;

    fn test_db() -> WireGuardDb {
        let db = Database::open_memory().unwrap();
        let wdb = WireGuardDb::new(db);
        wdb.init_schema().unwrap();
        wdb
    }

    #[test]
    fn test_instance_crud() {
        let db = test_db();
        let instance = fixtures::instance(0);
        db.create_instance(&instance).unwrap();

        let fetched = db.get_instance(instance.id).unwrap().unwrap();
        assert_eq!(fetched.instance_id, 0);
        assert_eq!(fetched.hostname, "vpn.example.com");

        assert_eq!(db.next_instance_id().unwrap(), 1);

        let mut updated = fetched.clone();
        updated.hostname = "vpn2.example.com".to_string();
        db.update_instance(&updated).unwrap();
        assert_eq!(
            db.get_instance(instance.id).unwrap().unwrap().hostname,
            "vpn2.example.com"
        );

        assert!(db.delete_instance(instance.id).unwrap());
        assert!(db.get_instance(instance.id).unwrap().is_none());
    }

    #[test]
    fn test_next_instance_id_empty() {
        let db = test_db();
        assert_eq!(db.next_instance_id().unwrap(), 0);
    }

    #[test]
    fn test_peer_crud_and_ordering() {
        let db = test_db();
        let instance = fixtures::instance(0);
        db.create_instance(&instance).unwrap();

        let mut first = fixtures::peer(instance.id, "laptop");
        first.created_at = 100;
        let mut second = fixtures::peer(instance.id, "phone");
        second.created_at = 200;

        // Insert out of order; listing must come back in creation order.
        db.create_peer(&second).unwrap();
        db.create_peer(&first).unwrap();

        let peers = db.list_peers(instance.id).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name, "laptop");
        assert_eq!(peers[1].name, "phone");

        assert!(db.delete_peer(first.id).unwrap());
        assert_eq!(db.list_peers(instance.id).unwrap().len(), 1);
    }

    #[test]
    fn test_allowed_ips_sorted_by_priority() {
        let db = test_db();
        let instance = fixtures::instance(0);
        db.create_instance(&instance).unwrap();
        let peer = fixtures::peer(instance.id, "laptop");
        db.create_peer(&peer).unwrap();

        db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "192.168.1.0", 24, 2))
            .unwrap();
        db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0))
            .unwrap();
        db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "172.16.0.0", 16, 1))
            .unwrap();

        let ips = db.list_allowed_ips(peer.id, ConfigFile::Server).unwrap();
        let priorities: Vec<u32> = ips.iter().map(|ip| ip.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);

        let zero = db.priority_zero_ip(peer.id).unwrap().unwrap();
        assert_eq!(zero.allowed_ip, "10.0.0.2");
        assert_eq!(zero.netmask, 32);
    }

    #[test]
    fn test_single_priority_zero_enforced() {
        let db = test_db();
        let instance = fixtures::instance(0);
        db.create_instance(&instance).unwrap();
        let peer = fixtures::peer(instance.id, "laptop");
        db.create_peer(&peer).unwrap();

        db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0))
            .unwrap();
        let result = db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "10.0.0.3", 32, 0));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("priority-0"));

        // A client-side priority-0 row is a separate namespace.
        let mut client_ip = fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0);
        client_ip.config_file = ConfigFile::Client;
        db.add_allowed_ip(&client_ip).unwrap();
    }

    #[test]
    fn test_delete_instance_cascades() {
        let db = test_db();
        let instance = fixtures::instance(0);
        db.create_instance(&instance).unwrap();
        let peer = fixtures::peer(instance.id, "laptop");
        db.create_peer(&peer).unwrap();
        db.add_allowed_ip(&fixtures::allowed_ip(peer.id, "10.0.0.2", 32, 0))
            .unwrap();

        db.delete_instance(instance.id).unwrap();
        assert!(db.get_peer(peer.id).unwrap().is_none());
        assert!(db.priority_zero_ip(peer.id).unwrap().is_none());
    }
}
