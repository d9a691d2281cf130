// Credential persistence over SQLite
// Single key/value table, all three session keys written transactionally

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use super::types::Session;
use crate::error::SessionError;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const TOKEN_EXPIRY_KEY: &str = "tokenExpiry";

/// Durable key/value store for the current session.
///
/// The coordinator is the only writer; everything else reads. Reads and
/// writes are synchronous and each covers all three keys in one
/// transaction, so no reader ever observes a token without its matching
/// expiry.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let conn = Connection::open(path)
            .map_err(|e| SessionError::Store(format!("failed to open {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, SessionError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SessionError::Store(format!("failed to open in-memory store: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SessionError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read the current session. Missing keys map to absent fields.
    pub fn read(&self) -> Result<Session, SessionError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT key, value FROM session_kv")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(store_err)?;

        let mut session = Session::empty();
        for row in rows {
            let (key, value) = row.map_err(store_err)?;
            match key.as_str() {
                ACCESS_TOKEN_KEY => session.access_token = Some(value),
                REFRESH_TOKEN_KEY => session.refresh_token = Some(value),
                TOKEN_EXPIRY_KEY => session.expires_at = parse_expiry(&value),
                _ => {}
            }
        }
        Ok(session)
    }

    /// Replace the stored session with `session`, atomically across all
    /// three keys.
    pub fn write(&self, session: &Session) -> Result<(), SessionError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_err)?;
        upsert(&tx, ACCESS_TOKEN_KEY, session.access_token.as_deref())?;
        upsert(&tx, REFRESH_TOKEN_KEY, session.refresh_token.as_deref())?;
        let expiry = session.expires_at.map(|t| t.timestamp_millis().to_string());
        upsert(&tx, TOKEN_EXPIRY_KEY, expiry.as_deref())?;
        tx.commit().map_err(store_err)
    }

    /// Remove all session keys.
    pub fn clear(&self) -> Result<(), SessionError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_err)?;
        tx.execute("DELETE FROM session_kv", []).map_err(store_err)?;
        tx.commit().map_err(store_err)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("credential store lock poisoned")
    }
}

fn upsert(
    tx: &rusqlite::Transaction<'_>,
    key: &str,
    value: Option<&str>,
) -> Result<(), SessionError> {
    match value {
        Some(value) => tx
            .execute(
                "INSERT INTO session_kv (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )
            .map(|_| ())
            .map_err(store_err),
        None => tx
            .execute("DELETE FROM session_kv WHERE key = ?1", [key])
            .map(|_| ())
            .map_err(store_err),
    }
}

fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn store_err(e: rusqlite::Error) -> SessionError {
    SessionError::Store(e.to_string())
}
