//! Session store: fingerprints keyed by session id.

#![allow(missing_docs)]

use std::collections::BTreeMap;
#[cfg(feature = "sqlite")]
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
#[cfg(feature = "sqlite")]
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::core::errors::{CsnError, Result};
use crate::session::fingerprint::SessionFingerprint;

/// Read/write access to the fingerprints the host session layer keeps.
pub trait SessionStore {
    fn get(&self, session_id: &str) -> Result<Option<SessionFingerprint>>;

    /// Insert or replace.
    fn put(&self, session_id: &str, fingerprint: &SessionFingerprint) -> Result<()>;

    /// Returns whether a session was removed.
    fn remove(&self, session_id: &str) -> Result<bool>;

    /// Every stored session, ordered by id.
    fn list(&self) -> Result<Vec<(String, SessionFingerprint)>>;
}

// ──────────────────── sqlite ────────────────────

#[cfg(feature = "sqlite")]
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

#[cfg(feature = "sqlite")]
impl SqliteSessionStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| CsnError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS sessions (
                 session_id TEXT PRIMARY KEY,
                 ip TEXT NOT NULL,
                 user_agent TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "sqlite")]
fn row_fingerprint(ip: String, user_agent: String, created_at: &str) -> Result<SessionFingerprint> {
    let created_at = chrono::DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| CsnError::SessionStore {
            details: format!("bad created_at {created_at:?}: {e}"),
        })?
        .with_timezone(&chrono::Utc);
    Ok(SessionFingerprint {
        ip,
        user_agent,
        created_at,
    })
}

#[cfg(feature = "sqlite")]
impl SessionStore for SqliteSessionStore {
    fn get(&self, session_id: &str) -> Result<Option<SessionFingerprint>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT ip, user_agent, created_at FROM sessions WHERE session_id = ?1")?
            .query_row(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;
        row.map(|(ip, ua, created)| row_fingerprint(ip, ua, &created))
            .transpose()
    }

    fn put(&self, session_id: &str, fingerprint: &SessionFingerprint) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO sessions (session_id, ip, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 ip = excluded.ip,
                 user_agent = excluded.user_agent,
                 created_at = excluded.created_at",
        )?
        .execute(params![
            session_id,
            fingerprint.ip,
            fingerprint.user_agent,
            fingerprint.created_at.to_rfc3339(),
        ])?;
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .prepare_cached("DELETE FROM sessions WHERE session_id = ?1")?
            .execute(params![session_id])?;
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<(String, SessionFingerprint)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT session_id, ip, user_agent, created_at FROM sessions ORDER BY session_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, ip, ua, created)| Ok((id, row_fingerprint(ip, ua, &created)?)))
            .collect()
    }
}

// ──────────────────── in-memory ────────────────────

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<BTreeMap<String, SessionFingerprint>>,
    failing: Mutex<bool>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    fn guard(&self) -> Result<()> {
        if *self.failing.lock() {
            return Err(CsnError::SessionStore {
                details: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str) -> Result<Option<SessionFingerprint>> {
        self.guard()?;
        Ok(self.sessions.read().get(session_id).cloned())
    }

    fn put(&self, session_id: &str, fingerprint: &SessionFingerprint) -> Result<()> {
        self.guard()?;
        self.sessions
            .write()
            .insert(session_id.to_string(), fingerprint.clone());
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<bool> {
        self.guard()?;
        Ok(self.sessions.write().remove(session_id).is_some())
    }

    fn list(&self) -> Result<Vec<(String, SessionFingerprint)>> {
        self.guard()?;
        Ok(self
            .sessions
            .read()
            .iter()
            .map(|(id, fp)| (id.clone(), fp.clone()))
            .collect())
    }
}
