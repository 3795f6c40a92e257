//! SQLite-backed session store.
//!
//! Sessions, their events and scoped state survive restarts. Events are kept
//! as JSON with an autoincrement sequence that preserves append order.

use super::{Session, SessionKey, SessionState, SessionStore, StateScope};
use crate::error::{Result, TollgateError};
use crate::events::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (app_name, user_id, session_id)
    );

    CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        invocation_id TEXT NOT NULL,
        author TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        event_json TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_session ON events(app_name, user_id, session_id);
    CREATE INDEX IF NOT EXISTS idx_events_invocation ON events(invocation_id);

    CREATE TABLE IF NOT EXISTS session_state (
        scope TEXT NOT NULL,
        owner TEXT NOT NULL,
        key TEXT NOT NULL,
        value_json TEXT NOT NULL,
        PRIMARY KEY (scope, owner, key)
    );
"#;

/// SQLite-based session store.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) a session database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite session store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite session store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TollgateError::Session(format!("Failed to acquire lock: {}", e)))
    }

    fn parse_time(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn load_session(conn: &Connection, key: &SessionKey) -> Result<Option<Session>> {
        let session = conn
            .query_row(
                r#"
                SELECT s.created_at, s.updated_at,
                       (SELECT COUNT(*) FROM events e
                        WHERE e.app_name = s.app_name AND e.user_id = s.user_id
                          AND e.session_id = s.session_id)
                FROM sessions s
                WHERE s.app_name = ?1 AND s.user_id = ?2 AND s.session_id = ?3
                "#,
                params![key.app_name, key.user_id, key.session_id],
                |row| {
                    let created: String = row.get(0)?;
                    let updated: String = row.get(1)?;
                    let count: i64 = row.get(2)?;
                    Ok(Session {
                        key: key.clone(),
                        event_count: count as usize,
                        created_at: Self::parse_time(&created),
                        updated_at: Self::parse_time(&updated),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self))]
    async fn create_session(&self, key: &SessionKey) -> Result<Session> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT OR IGNORE INTO sessions (app_name, user_id, session_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![key.app_name, key.user_id, key.session_id, now],
        )?;

        Self::load_session(&conn, key)?
            .ok_or_else(|| TollgateError::SessionNotFound(key.to_string()))
    }

    #[instrument(skip(self))]
    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        let conn = self.lock()?;
        Self::load_session(&conn, key)
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT s.session_id, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM events e
                    WHERE e.app_name = s.app_name AND e.user_id = s.user_id
                      AND e.session_id = s.session_id)
            FROM sessions s
            WHERE s.app_name = ?1 AND s.user_id = ?2
            ORDER BY s.updated_at DESC
            "#,
        )?;

        let rows = stmt.query_map(params![app_name, user_id], |row| {
            let session_id: String = row.get(0)?;
            let created: String = row.get(1)?;
            let updated: String = row.get(2)?;
            let count: i64 = row.get(3)?;
            Ok(Session {
                key: SessionKey::new(app_name, user_id, &session_id),
                event_count: count as usize,
                created_at: Self::parse_time(&created),
                updated_at: Self::parse_time(&updated),
            })
        })?;

        let sessions: Vec<Session> = rows.filter_map(|r| r.ok()).collect();
        Ok(sessions)
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<()> {
        let conn = self.lock()?;

        if Self::load_session(&conn, key)?.is_none() {
            return Err(TollgateError::SessionNotFound(key.to_string()));
        }

        let event_json = serde_json::to_string(event)?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO events
            (id, app_name, user_id, session_id, invocation_id, author, timestamp, event_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.id,
                key.app_name,
                key.user_id,
                key.session_id,
                event.invocation_id,
                event.author,
                event.timestamp.to_rfc3339(),
                event_json,
            ],
        )?;
        tx.execute(
            r#"
            UPDATE sessions SET updated_at = ?4
            WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
            "#,
            params![key.app_name, key.user_id, key.session_id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        debug!("Appended event to session {}", key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn events(&self, key: &SessionKey) -> Result<Vec<Event>> {
        let conn = self.lock()?;

        if Self::load_session(&conn, key)?.is_none() {
            return Err(TollgateError::SessionNotFound(key.to_string()));
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT event_json FROM events
            WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
            ORDER BY seq
            "#,
        )?;

        let rows = stmt.query_map(params![key.app_name, key.user_id, key.session_id], |row| {
            row.get::<_, String>(0)
        })?;

        let mut events = Vec::new();
        for json in rows {
            events.push(serde_json::from_str(&json?)?);
        }

        debug!("Loaded {} events for session {}", events.len(), key);
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn state(&self, key: &SessionKey) -> Result<SessionState> {
        let conn = self.lock()?;
        let mut values = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT key, value_json FROM session_state WHERE scope = ?1 AND owner = ?2",
        )?;

        for scope in [StateScope::App, StateScope::User, StateScope::Session] {
            let Some(owner) = scope.owner(key) else {
                continue;
            };
            let rows = stmt.query_map(params![scope.as_str(), owner], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (k, json) = row?;
                values.insert(k, serde_json::from_str(&json)?);
            }
        }

        Ok(SessionState::from_values(values))
    }

    #[instrument(skip(self, value))]
    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let scope = StateScope::of(state_key);
        let Some(owner) = scope.owner(key) else {
            return Ok(());
        };

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO session_state (scope, owner, key, value_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![scope.as_str(), owner, state_key, serde_json::to_string(&value)?],
        )?;
        Ok(())
    }
}
