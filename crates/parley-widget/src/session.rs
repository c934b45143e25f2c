//! Chat sessions and their persisted store.
//!
//! [`SessionStore`] owns every session of one widget instance. Each mutating
//! operation writes the whole collection to [`StateStorage`] before it
//! returns; a failed write is logged and the store carries on in memory.
//! Several instances sharing one storage key are not coordinated: the last
//! write wins.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_types::{Role, WireMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::storage::StateStorage;

pub type SessionId = Uuid;
pub type MessageId = Uuid;

/// Storage key of the persisted session collection.
pub const STORAGE_KEY: &str = "parley-chat-sessions";
/// Title every session starts with until the first user message names it.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
/// Longest derived title, in characters, before the ellipsis.
pub const TITLE_MAX_CHARS: usize = 30;
const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    fn seeded(welcome_message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_SESSION_TITLE.to_owned(),
            messages: vec![Message::assistant(welcome_message)],
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether the title is still the placeholder.
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }
}

/// Title derived from a user message: trimmed, and cut to
/// [`TITLE_MAX_CHARS`] characters with a trailing ellipsis when longer.
pub fn derive_title(candidate: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        trimmed.to_owned()
    }
}

pub struct SessionStore {
    storage: Arc<dyn StateStorage>,
    sessions: HashMap<SessionId, ChatSession>,
    current: Option<SessionId>,
    welcome_message: String,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("current", &self.current)
            .finish()
    }
}

impl SessionStore {
    /// Load the persisted collection and pick the current session.
    ///
    /// Missing or malformed state yields an empty collection followed by a
    /// freshly created session. Otherwise the most recently updated session
    /// becomes current.
    pub fn open(storage: Arc<dyn StateStorage>, welcome_message: impl Into<String>) -> Self {
        let sessions = load_sessions(storage.as_ref());
        let mut store = Self {
            storage,
            sessions,
            current: None,
            welcome_message: welcome_message.into(),
        };
        store.current = store.most_recent_id();
        if store.current.is_none() {
            store.create_session();
        }
        store
    }

    // ── queries ──────────────────────────────────────────────────────────────

    /// All sessions, most recently updated first.
    pub fn sessions(&self) -> Vec<&ChatSession> {
        let mut sessions: Vec<&ChatSession> = self.sessions.values().collect();
        sessions.sort_by(|a, b| by_recent_desc(a, b));
        sessions
    }

    pub fn session(&self, id: SessionId) -> Option<&ChatSession> {
        self.sessions.get(&id)
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current
    }

    pub fn current_session(&self) -> Option<&ChatSession> {
        self.current.and_then(|id| self.sessions.get(&id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // ── mutations ────────────────────────────────────────────────────────────

    /// Create a session seeded with the welcome message and make it current.
    pub fn create_session(&mut self) -> SessionId {
        let session = ChatSession::seeded(&self.welcome_message);
        let id = session.id;
        self.sessions.insert(id, session);
        self.current = Some(id);
        self.persist();
        debug!(session_id = %id, "chat session created");
        id
    }

    /// Append a message; unknown sessions are logged and ignored.
    pub fn append_message(&mut self, session_id: SessionId, message: Message) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            warn!(session_id = %session_id, "append to unknown session ignored");
            return false;
        };
        session.messages.push(message);
        session.touch();
        self.persist();
        true
    }

    /// Replace the content of exactly one message.
    pub fn update_message_content(
        &mut self,
        session_id: SessionId,
        message_id: MessageId,
        content: impl Into<String>,
    ) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            warn!(session_id = %session_id, "update in unknown session ignored");
            return false;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            warn!(session_id = %session_id, message_id = %message_id, "update of unknown message ignored");
            return false;
        };
        message.content = content.into();
        session.touch();
        self.persist();
        true
    }

    /// Name the session after `candidate` if it still has the placeholder
    /// title. Returns whether the title changed.
    pub fn rename_if_default(&mut self, session_id: SessionId, candidate: &str) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            warn!(session_id = %session_id, "rename of unknown session ignored");
            return false;
        };
        let title = derive_title(candidate);
        if !session.has_default_title() || title.is_empty() {
            return false;
        }
        session.title = title;
        session.touch();
        self.persist();
        true
    }

    pub fn select_session(&mut self, session_id: SessionId) -> bool {
        if !self.sessions.contains_key(&session_id) {
            warn!(session_id = %session_id, "select of unknown session ignored");
            return false;
        }
        self.current = Some(session_id);
        true
    }

    /// Remove a session. When it was current, the most recently updated
    /// remaining session takes over, or a fresh one is created.
    pub fn delete_session(&mut self, session_id: SessionId) -> bool {
        if self.sessions.remove(&session_id).is_none() {
            warn!(session_id = %session_id, "delete of unknown session ignored");
            return false;
        }
        if self.current == Some(session_id) {
            self.current = self.most_recent_id();
        }
        match self.current {
            Some(_) => self.persist(),
            None => {
                self.create_session();
            }
        }
        true
    }

    /// Remove every session and start over with one fresh session.
    pub fn clear_all(&mut self) -> SessionId {
        self.sessions.clear();
        self.current = None;
        if let Err(e) = self.storage.remove(STORAGE_KEY) {
            warn!(error = %e, "failed to clear persisted chat sessions");
        }
        self.create_session()
    }

    // ── private helpers ──────────────────────────────────────────────────────

    fn most_recent_id(&self) -> Option<SessionId> {
        self.sessions().first().map(|s| s.id)
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.sessions())
            .map_err(PersistenceError::from)
            .and_then(|json| self.storage.write(STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist chat sessions; continuing in memory");
        }
    }
}

fn load_sessions(storage: &dyn StateStorage) -> HashMap<SessionId, ChatSession> {
    let text = match storage.read(STORAGE_KEY) {
        Ok(Some(text)) => text,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            warn!(error = %e, "failed to read persisted chat sessions");
            return HashMap::new();
        }
    };
    match serde_json::from_str::<Vec<ChatSession>>(&text) {
        Ok(sessions) => sessions.into_iter().map(|s| (s.id, s)).collect(),
        Err(e) => {
            warn!(error = %PersistenceError::from(e), "discarding malformed chat sessions");
            HashMap::new()
        }
    }
}

fn by_recent_desc(left: &ChatSession, right: &ChatSession) -> Ordering {
    right
        .updated_at
        .cmp(&left.updated_at)
        .then_with(|| right.created_at.cmp(&left.created_at))
        .then_with(|| right.id.cmp(&left.id))
}
