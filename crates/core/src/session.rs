//! Session Registry
//!
//! Holds the live sessions of the process. The registry is created once at
//! startup and handed to whoever accepts connections; each connection creates
//! exactly one session and removes it again at teardown.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-session key/value state that tools record into.
#[derive(Debug, Clone, Default)]
pub struct SessionState(Arc<Mutex<Map<String, Value>>>);

impl SessionState {
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.0.lock().await.insert(key.into(), value);
    }

    /// Appends `value` to the JSON array stored under `key`, creating it if needed.
    pub async fn push(&self, key: &str, value: Value) {
        let mut state = self.0.lock().await;
        match state.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                state.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// Appends `value` to the array under `key` unless it is already present.
    pub async fn push_unique(&self, key: &str, value: Value) {
        let mut state = self.0.lock().await;
        match state.get_mut(key) {
            Some(Value::Array(items)) => {
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            _ => {
                state.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// Increments the integer counter under `key` and returns its new value.
    pub async fn increment(&self, key: &str) -> u64 {
        let mut state = self.0.lock().await;
        let next = state.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
        state.insert(key.to_string(), Value::from(next));
        next
    }
}

/// A conversation with the agent backend, bound to a single connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub app_name: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Process-wide registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a fresh session. Sessions are never reused.
    pub async fn create_session(&self, app_name: &str, client_id: &str) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            app_name: app_name.to_string(),
            client_id: client_id.to_string(),
            created_at: Utc::now(),
            state: SessionState::default(),
        };
        self.sessions
            .lock()
            .await
            .insert(session.id, session.clone());
        info!(session_id = %session.id, %app_name, %client_id, "Session created");
        session
    }

    pub async fn remove(&self, id: Uuid) -> Option<Session> {
        let removed = self.sessions.lock().await.remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
