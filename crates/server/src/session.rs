//! Session management: an in-memory store of conversations, keyed by a
//! server-generated UUID, backing both the WebSocket orchestrator's
//! history and the `/api/sessions` HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A single conversation. `messages` and `title` are the only fields the
/// pipeline's turn logic touches; the rest is bookkeeping for the HTTP
/// surface and idle cleanup.
pub struct Session {
    pub id: String,
    pub device_id: RwLock<Option<String>>,
    pub created_at: DateTime<Utc>,
    last_activity: RwLock<Instant>,
    messages: RwLock<Vec<Message>>,
    title: RwLock<Option<String>>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            device_id: RwLock::new(None),
            created_at: Utc::now(),
            last_activity: RwLock::new(Instant::now()),
            messages: RwLock::new(Vec::new()),
            title: RwLock::new(None),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn title(&self) -> Option<String> {
        self.title.read().clone()
    }
}

/// Pluggable session storage backend. Only an in-memory implementation
/// ships here; the trait exists so the server can later swap in a durable
/// store without touching callers.
pub trait SessionStore: Send + Sync {
    fn create(&self) -> Arc<Session>;
    fn get(&self, id: &str) -> Option<Arc<Session>>;
    fn list(&self) -> Vec<Arc<Session>>;
    fn delete(&self, id: &str) -> bool;
    fn append_message(&self, id: &str, role: MessageRole, content: &str) -> Result<(), ServerError>;
    fn set_title(&self, id: &str, title: &str) -> Result<(), ServerError>;
    fn cleanup_expired(&self, timeout: Duration) -> usize;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));
        self.sessions.write().insert(id, session.clone());
        session
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    fn delete(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    fn append_message(&self, id: &str, role: MessageRole, content: &str) -> Result<(), ServerError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| ServerError::Session(format!("unknown session: {id}")))?;
        session.messages.write().push(Message {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        session.touch();
        Ok(())
    }

    fn set_title(&self, id: &str, title: &str) -> Result<(), ServerError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(id)
            .ok_or_else(|| ServerError::Session(format!("unknown session: {id}")))?;
        *session.title.write() = Some(title.to_string());
        Ok(())
    }

    fn cleanup_expired(&self, timeout: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_delete_round_trip() {
        let store = InMemorySessionStore::new();
        let session = store.create();
        assert!(store.get(&session.id).is_some());
        assert!(store.delete(&session.id));
        assert!(store.get(&session.id).is_none());
    }

    #[test]
    fn append_message_updates_count_and_activity() {
        let store = InMemorySessionStore::new();
        let session = store.create();
        store.append_message(&session.id, MessageRole::User, "hi").unwrap();
        store
            .append_message(&session.id, MessageRole::Assistant, "hello")
            .unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[test]
    fn append_message_on_unknown_session_errors() {
        let store = InMemorySessionStore::new();
        assert!(store.append_message("missing", MessageRole::User, "hi").is_err());
    }

    #[test]
    fn set_title_is_visible_via_session() {
        let store = InMemorySessionStore::new();
        let session = store.create();
        store.set_title(&session.id, "Weather in Tokyo").unwrap();
        assert_eq!(session.title(), Some("Weather in Tokyo".to_string()));
    }
}
