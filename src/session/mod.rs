//! Session services: conversations, their event traces, and key/value state.
//!
//! Provides a trait-based interface with in-memory and SQLite backends.
//!
//! State keys are scoped by prefix:
//! - `app:` shared by every session of the app
//! - `user:` shared by every session of one user
//! - `temp:` lives only for the current invocation and is never stored
//! - no prefix: private to one session

mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use crate::config::{SessionProvider, Settings};
use crate::error::Result;
use crate::events::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifies one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// Summary of a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub event_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a state key is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateScope {
    App,
    User,
    Session,
    Temp,
}

impl StateScope {
    pub const APP_PREFIX: &'static str = "app:";
    pub const USER_PREFIX: &'static str = "user:";
    pub const TEMP_PREFIX: &'static str = "temp:";

    pub fn of(key: &str) -> Self {
        if key.starts_with(Self::APP_PREFIX) {
            StateScope::App
        } else if key.starts_with(Self::USER_PREFIX) {
            StateScope::User
        } else if key.starts_with(Self::TEMP_PREFIX) {
            StateScope::Temp
        } else {
            StateScope::Session
        }
    }

    /// Storage owner for this scope, or None for `temp:` keys.
    pub fn owner(&self, key: &SessionKey) -> Option<String> {
        match self {
            StateScope::App => Some(key.app_name.clone()),
            StateScope::User => Some(format!("{}/{}", key.app_name, key.user_id)),
            StateScope::Session => Some(key.to_string()),
            StateScope::Temp => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateScope::App => "app",
            StateScope::User => "user",
            StateScope::Session => "session",
            StateScope::Temp => "temp",
        }
    }
}

/// Merged view of the state visible to one session, with change tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    values: BTreeMap<String, serde_json::Value>,
    changed: BTreeMap<String, serde_json::Value>,
}

impl SessionState {
    pub fn from_values(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            values,
            changed: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.values.insert(key.to_string(), value.clone());
        self.changed.insert(key.to_string(), value);
    }

    /// Changes that should be written back (excludes `temp:` keys).
    pub fn persistent_changes(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.changed
            .iter()
            .filter(|(k, _)| StateScope::of(k) != StateScope::Temp)
    }

    /// Forget tracked changes once they have been written back.
    pub fn mark_saved(&mut self) {
        self.changed.clear();
    }

    /// Replace persisted values with `current`, keeping this view's `temp:` keys
    /// and any changes not yet written back.
    pub fn refresh(&mut self, current: SessionState) {
        let mut values = current.values;
        for (k, v) in &self.values {
            if StateScope::of(k) == StateScope::Temp {
                values.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &self.changed {
            values.insert(k.clone(), v.clone());
        }
        self.values = values;
    }

    pub fn values(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Trait for session store implementations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session. Creating an existing session returns it unchanged.
    async fn create_session(&self, key: &SessionKey) -> Result<Session>;

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>>;

    /// Sessions of one user, most recently updated first.
    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>>;

    /// Append an event to an existing session.
    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<()>;

    /// All events of a session in the order they were appended.
    async fn events(&self, key: &SessionKey) -> Result<Vec<Event>>;

    /// State visible to the session (app, user and session scopes merged).
    async fn state(&self, key: &SessionKey) -> Result<SessionState>;

    /// Store one state value in the scope its prefix selects.
    async fn set_state(&self, key: &SessionKey, state_key: &str, value: serde_json::Value)
        -> Result<()>;

    /// Get a session, creating it if needed.
    async fn get_or_create(&self, key: &SessionKey) -> Result<Session> {
        match self.get_session(key).await? {
            Some(session) => Ok(session),
            None => self.create_session(key).await,
        }
    }

    /// Write back every persistent change in `state`.
    async fn save_state(&self, key: &SessionKey, state: &SessionState) -> Result<()> {
        for (k, v) in state.persistent_changes() {
            self.set_state(key, k, v.clone()).await?;
        }
        Ok(())
    }
}

/// Build the session store selected in settings.
pub fn create_store(settings: &Settings) -> Result<Arc<dyn SessionStore>> {
    Ok(match settings.session.provider {
        SessionProvider::Sqlite => Arc::new(SqliteSessionStore::new(&settings.sqlite_path())?),
        SessionProvider::Memory => Arc::new(MemorySessionStore::new()),
    })
}
