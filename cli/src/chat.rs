//! Chat sessions and their message lists
//!
//! The store is the single owner of conversation state on the client side.
//! Relay handlers and fallback tasks append to it from other tasks; every
//! append is broadcast as a [`ChatEvent`] so the terminal UI can render
//! messages in the order they were stored.

use chrono::{DateTime, Utc};
use privacyai_core::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 50;
const EVENT_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("No active chat session")]
    NoSession,

    #[error("Unknown chat session: {0}")]
    UnknownSession(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    User,
    /// Delivered by the responder over the relay
    Relay,
    /// Synthesized locally because the relay could not answer
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub origin: MessageOrigin,
    /// Id of the user message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl ChatMessage {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
            origin: MessageOrigin::User,
            in_reply_to: None,
        }
    }

    /// Assistant message built from a response envelope; keeps its message id.
    pub fn from_response(envelope: &Envelope) -> Self {
        Self {
            id: envelope.message_id.clone(),
            session_id: envelope.session_id.clone(),
            content: envelope.content.clone(),
            role: Role::Assistant,
            timestamp: envelope.timestamp,
            origin: MessageOrigin::Relay,
            in_reply_to: envelope.correlation_id.clone(),
        }
    }

    pub fn simulated(session_id: impl Into<String>, content: impl Into<String>, in_reply_to: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            content: content.into(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            origin: MessageOrigin::Simulated,
            in_reply_to,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.origin == MessageOrigin::Simulated
    }
}

/// Session metadata; messages are fetched separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionCreated(String),
    SessionDeleted(String),
    CurrentChanged(Option<String>),
    MessageAppended(ChatMessage),
}

struct SessionEntry {
    id: String,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

impl SessionEntry {
    fn summary(&self) -> ChatSession {
        ChatSession {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, SessionEntry>,
    /// Newest first
    order: Vec<String>,
    current: Option<String>,
}

pub struct ChatStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("ChatStore")
            .field("sessions", &state.order.len())
            .field("current", &state.current)
            .finish()
    }
}

/// First 50 characters of the message, with `...` when cut
pub fn session_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            events,
        }
    }

    // Locks are never held across user code, so recover from poisoning.
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Creates a session with a fresh id and makes it current.
    pub fn create_session(&self) -> ChatSession {
        let now = Utc::now();
        let entry = SessionEntry {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };
        let summary = entry.summary();
        {
            let mut state = self.write();
            state.order.insert(0, entry.id.clone());
            state.current = Some(entry.id.clone());
            state.sessions.insert(entry.id.clone(), entry);
        }
        info!(session_id = %summary.id, "Created chat session");
        self.emit(ChatEvent::SessionCreated(summary.id.clone()));
        self.emit(ChatEvent::CurrentChanged(Some(summary.id.clone())));
        summary
    }

    pub fn select_session(&self, session_id: &str) -> Result<(), ChatError> {
        {
            let mut state = self.write();
            if !state.sessions.contains_key(session_id) {
                return Err(ChatError::UnknownSession(session_id.to_string()));
            }
            state.current = Some(session_id.to_string());
        }
        debug!(session_id, "Switched chat session");
        self.emit(ChatEvent::CurrentChanged(Some(session_id.to_string())));
        Ok(())
    }

    /// Removes a session. When it was current, the newest remaining session
    /// becomes current.
    pub fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        let current_changed = {
            let mut state = self.write();
            if state.sessions.remove(session_id).is_none() {
                return Err(ChatError::UnknownSession(session_id.to_string()));
            }
            state.order.retain(|id| id != session_id);
            if state.current.as_deref() == Some(session_id) {
                state.current = state.order.first().cloned();
                Some(state.current.clone())
            } else {
                None
            }
        };
        info!(session_id, "Deleted chat session");
        self.emit(ChatEvent::SessionDeleted(session_id.to_string()));
        if let Some(current) = current_changed {
            self.emit(ChatEvent::CurrentChanged(current));
        }
        Ok(())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().sessions.contains_key(session_id)
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.read().current.clone()
    }

    /// Sessions, newest first
    pub fn sessions(&self) -> Vec<ChatSession> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .map(SessionEntry::summary)
            .collect()
    }

    pub fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        self.read()
            .sessions
            .get(session_id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| ChatError::UnknownSession(session_id.to_string()))
    }

    /// Appends to the message's session; fails if that session is gone.
    pub fn append(&self, message: ChatMessage) -> Result<(), ChatError> {
        {
            let mut state = self.write();
            let entry = state
                .sessions
                .get_mut(&message.session_id)
                .ok_or_else(|| ChatError::UnknownSession(message.session_id.clone()))?;
            entry.updated_at = Utc::now();
            entry.messages.push(message.clone());
        }
        debug!(
            session_id = %message.session_id,
            message_id = %message.id,
            origin = ?message.origin,
            "Appended chat message"
        );
        self.emit(ChatEvent::MessageAppended(message));
        Ok(())
    }

    /// Validates and stores a user message in the current session. The first
    /// user message names the session.
    pub fn record_user_message(&self, content: &str) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message = {
            let mut state = self.write();
            let session_id = state.current.clone().ok_or(ChatError::NoSession)?;
            let entry = state
                .sessions
                .get_mut(&session_id)
                .ok_or(ChatError::UnknownSession(session_id.clone()))?;

            let message = ChatMessage::user(&session_id, content);
            if !entry.messages.iter().any(|m| m.role == Role::User) {
                entry.title = session_title(content);
            }
            entry.updated_at = message.timestamp;
            entry.messages.push(message.clone());
            message
        };
        self.emit(ChatEvent::MessageAppended(message.clone()));
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_truncation() {
        assert_eq!(session_title("  short question  "), "short question");
        let long = "a".repeat(60);
        assert_eq!(session_title(&long), format!("{}...", "a".repeat(50)));
        let exact = "é".repeat(50);
        assert_eq!(session_title(&exact), exact);
    }

    #[test]
    fn test_sessions_newest_first_and_current() {
        let store = ChatStore::new();
        let first = store.create_session();
        let second = store.create_session();

        let ids: Vec<String> = store.sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(store.current_session_id(), Some(second.id.clone()));

        store.select_session(&first.id).unwrap();
        assert_eq!(store.current_session_id(), Some(first.id.clone()));
        assert!(matches!(store.select_session("nope"), Err(ChatError::UnknownSession(_))));
    }

    #[test]
    fn test_delete_current_selects_next() {
        let store = ChatStore::new();
        let older = store.create_session();
        let newer = store.create_session();

        store.delete_session(&newer.id).unwrap();
        assert_eq!(store.current_session_id(), Some(older.id.clone()));
        assert!(!store.contains(&newer.id));

        store.delete_session(&older.id).unwrap();
        assert_eq!(store.current_session_id(), None);
        assert_eq!(store.record_user_message("hi"), Err(ChatError::NoSession));
    }

    #[test]
    fn test_record_user_message_rules() {
        let store = ChatStore::new();
        assert_eq!(store.record_user_message("hello"), Err(ChatError::NoSession));

        let session = store.create_session();
        assert_eq!(store.record_user_message("   "), Err(ChatError::EmptyMessage));

        let first = store.record_user_message(" What is Waku? ").unwrap();
        assert_eq!(first.content, "What is Waku?");
        store.record_user_message("And how private is it?").unwrap();

        let summary = &store.sessions()[0];
        assert_eq!(summary.title, "What is Waku?");
        assert_eq!(summary.message_count, 2);
        assert_eq!(store.messages(&session.id).unwrap()[0].id, first.id);
    }

    #[test]
    fn test_append_to_deleted_session_fails() {
        let store = ChatStore::new();
        let session = store.create_session();
        store.delete_session(&session.id).unwrap();

        let message = ChatMessage::simulated(&session.id, "late", None);
        assert_eq!(store.append(message), Err(ChatError::UnknownSession(session.id)));
    }

    #[test]
    fn test_events_in_append_order() {
        let store = ChatStore::new();
        let session = store.create_session();
        let mut events = store.subscribe();

        let user = store.record_user_message("Hello").unwrap();
        let reply = ChatMessage::simulated(&session.id, "simulated", Some(user.id.clone()));
        store.append(reply.clone()).unwrap();

        assert_eq!(events.try_recv().unwrap(), ChatEvent::MessageAppended(user));
        assert_eq!(events.try_recv().unwrap(), ChatEvent::MessageAppended(reply));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_message_from_response() {
        let request = Envelope::request("S1", "Hello");
        let response = Envelope::response_to(&request, "Hi there");
        let message = ChatMessage::from_response(&response);

        assert_eq!(message.id, response.message_id);
        assert_eq!(message.session_id, "S1");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.origin, MessageOrigin::Relay);
        assert_eq!(message.in_reply_to.as_deref(), Some(request.message_id.as_str()));
    }
}
