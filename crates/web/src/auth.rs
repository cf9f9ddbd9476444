//! Session authentication with numeric access levels
//!
//! Bearer tokens are random 32-byte values stored sha256-hashed with a 24h
//! TTL. Users carry an access level; operations are gated by thresholds:
//! level 20 may download peer configs and QR codes, level 30 may export
//! configs, restart interfaces, and mutate records.

use axum::http::{header, HeaderMap, StatusCode};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;
use wgconsole_common::Database;

/// Minimum level to download peer configs and QR codes
pub const LEVEL_DOWNLOAD: i64 = 20;
/// Minimum level to export configs, restart interfaces, and mutate records
pub const LEVEL_MANAGE: i64 = 30;

const SESSION_TTL_SECS: i64 = 60 * 60 * 24; // 24 hours

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub user_level: i64,
    pub created_at: i64,
}

impl User {
    pub fn has_minimum_level(&self, threshold: i64) -> bool {
        self.user_level >= threshold
    }
}

/// An issued session token and its expiry
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: i64,
}

// ============================================================================
// Database operations
// ============================================================================

/// Auth database wrapper
#[derive(Clone)]
pub struct AuthDb {
    db: Database,
}

impl AuthDb {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Initialize auth schema
    pub fn init_schema(&self) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute_batch(
            r#"
            -- Console users with access levels
            CREATE TABLE IF NOT EXISTS auth_users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                user_level INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Sessions
            CREATE TABLE IF NOT EXISTS auth_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES auth_users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_auth_sessions_token ON auth_sessions(token_hash);
            CREATE INDEX IF NOT EXISTS idx_auth_sessions_expires ON auth_sessions(expires_at);
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        user_level: i64,
    ) -> Result<User, String> {
        let id = Uuid::new_v4();
        let now = now_epoch_secs();

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO auth_users (id, username, password_hash, user_level, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), username, hash_secret(password), user_level, now],
        )
        .map_err(|e| e.to_string())?;

        info!("Created user {} with level {}", username, user_level);
        Ok(User {
            id,
            username: username.to_string(),
            user_level,
            created_at: now,
        })
    }

    pub fn count_users(&self) -> Result<usize, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM auth_users", [], |row| row.get(0))
            .map_err(|e| e.to_string())?;
        Ok(count as usize)
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, username, user_level, created_at FROM auth_users WHERE id = ?1",
            params![id.to_string()],
            user_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    /// Check credentials; returns the user on a match.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<Option<User>, String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, username, user_level, created_at FROM auth_users WHERE username = ?1 AND password_hash = ?2",
            params![username, hash_secret(password)],
            user_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    /// Issue a session token for a user.
    pub fn create_session(&self, user_id: Uuid) -> Result<IssuedSession, String> {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let token_hash = hash_secret(&token);
        let now = now_epoch_secs();
        let expires_at = now + SESSION_TTL_SECS;

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO auth_sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                token_hash,
                expires_at,
                now
            ],
        )
        .map_err(|e| e.to_string())?;

        Ok(IssuedSession { token, expires_at })
    }

    /// Resolve a bearer token to its user; expired sessions are removed.
    pub fn resolve_token(&self, token: &str) -> Result<Option<User>, String> {
        let token_hash = hash_secret(token);
        let conn = self.db.connection();
        let conn = conn.lock();

        let session: Option<(String, i64)> = conn
            .query_row(
                "SELECT user_id, expires_at FROM auth_sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| e.to_string())?;

        let (user_id, expires_at) = match session {
            Some(s) => s,
            None => return Ok(None),
        };

        if expires_at <= now_epoch_secs() {
            let _ = conn.execute(
                "DELETE FROM auth_sessions WHERE token_hash = ?1",
                params![token_hash],
            );
            return Ok(None);
        }

        conn.query_row(
            "SELECT id, username, user_level, created_at FROM auth_users WHERE id = ?1",
            params![user_id],
            user_from_row,
        )
        .optional()
        .map_err(|e| e.to_string())
    }

    pub fn delete_session(&self, token: &str) -> Result<(), String> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "DELETE FROM auth_sessions WHERE token_hash = ?1",
            params![hash_secret(token)],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn cleanup_expired_sessions(&self) -> Result<usize, String> {
        let now = now_epoch_secs();
        let conn = self.db.connection();
        let conn = conn.lock();
        let count = conn
            .execute(
                "DELETE FROM auth_sessions WHERE expires_at < ?1",
                params![now],
            )
            .map_err(|e| e.to_string())?;
        Ok(count)
    }

    #[cfg(test)]
    fn expire_all_sessions(&self) {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute("UPDATE auth_sessions SET expires_at = 0", [])
            .unwrap();
    }
}

// ============================================================================
// Request helpers
// ============================================================================

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Resolve the caller from the Authorization header.
pub fn get_current_user(auth: &AuthDb, headers: &HeaderMap) -> Result<User, StatusCode> {
    let token = extract_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    auth.resolve_token(&token)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
        username: row.get(1)?,
        user_level: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth() -> AuthDb {
        let db = Database::open_memory().unwrap();
        let auth = AuthDb::new(db);
        auth.init_schema().unwrap();
        auth
    }

    #[test]
    fn test_login_and_levels() {
        let auth = test_auth();
        let user = auth.create_user("admin", "secret", LEVEL_MANAGE).unwrap();
        assert!(user.has_minimum_level(LEVEL_DOWNLOAD));
        assert!(user.has_minimum_level(LEVEL_MANAGE));

        let viewer = auth.create_user("viewer", "pw", 10).unwrap();
        assert!(!viewer.has_minimum_level(LEVEL_DOWNLOAD));

        assert!(auth.verify_login("admin", "secret").unwrap().is_some());
        assert!(auth.verify_login("admin", "wrong").unwrap().is_none());
        assert!(auth.verify_login("ghost", "secret").unwrap().is_none());
    }

    #[test]
    fn test_session_roundtrip() {
        let auth = test_auth();
        let user = auth.create_user("admin", "secret", LEVEL_MANAGE).unwrap();
        let session = auth.create_session(user.id).unwrap();

        let resolved = auth.resolve_token(&session.token).unwrap().unwrap();
        assert_eq!(resolved.id, user.id);

        auth.delete_session(&session.token).unwrap();
        assert!(auth.resolve_token(&session.token).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_rejected() {
        let auth = test_auth();
        let user = auth.create_user("admin", "secret", LEVEL_MANAGE).unwrap();
        let session = auth.create_session(user.id).unwrap();

        auth.expire_all_sessions();
        assert!(auth.resolve_token(&session.token).unwrap().is_none());
        // The expired row was also dropped.
        assert_eq!(auth.cleanup_expired_sessions().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let auth = test_auth();
        auth.create_user("admin", "secret", LEVEL_MANAGE).unwrap();
        assert!(auth.create_user("admin", "other", 10).is_err());
    }
}
