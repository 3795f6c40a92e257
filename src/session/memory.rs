//! In-memory session store.
//!
//! Useful for testing and throwaway sessions; everything is lost on exit.

use super::{Session, SessionKey, SessionState, SessionStore, StateScope};
use crate::error::{Result, TollgateError};
use crate::events::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

struct StoredSession {
    events: Vec<Event>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionKey, StoredSession>,
    /// (scope, owner) -> key -> value
    state: HashMap<(&'static str, String), BTreeMap<String, serde_json::Value>>,
}

/// In-memory session store.
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn summary(key: &SessionKey, stored: &StoredSession) -> Session {
        Session {
            key: key.clone(),
            event_count: stored.events.len(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> TollgateError {
    TollgateError::Session(format!("Failed to acquire lock: {}", e))
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, key: &SessionKey) -> Result<Session> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let now = Utc::now();
        let stored = inner.sessions.entry(key.clone()).or_insert_with(|| StoredSession {
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(Self::summary(key, stored))
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.sessions.get(key).map(|s| Self::summary(key, s)))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut sessions: Vec<Session> = inner
            .sessions
            .iter()
            .filter(|(k, _)| k.app_name == app_name && k.user_id == user_id)
            .map(|(k, s)| Self::summary(k, s))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let stored = inner
            .sessions
            .get_mut(key)
            .ok_or_else(|| TollgateError::SessionNotFound(key.to_string()))?;
        stored.events.push(event.clone());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn events(&self, key: &SessionKey) -> Result<Vec<Event>> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .sessions
            .get(key)
            .map(|s| s.events.clone())
            .ok_or_else(|| TollgateError::SessionNotFound(key.to_string()))
    }

    async fn state(&self, key: &SessionKey) -> Result<SessionState> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut values = BTreeMap::new();

        for scope in [StateScope::App, StateScope::User, StateScope::Session] {
            if let Some(owner) = scope.owner(key) {
                if let Some(scoped) = inner.state.get(&(scope.as_str(), owner)) {
                    values.extend(scoped.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }

        Ok(SessionState::from_values(values))
    }

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

        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .state
            .entry((scope.as_str(), owner))
            .or_default()
            .insert(state_key.to_string(), value);
        Ok(())
    }
}
