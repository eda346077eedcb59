use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of an envelope. Serialized as the `type` field on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client -> responder, published on the request topic.
    Request,
    /// Responder -> client, published on the response topic.
    Response,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

/// The unit exchanged over a content topic.
///
/// A response carries the `session_id` of the request that caused it and a
/// freshly generated `message_id`. `correlation_id` holds the request's
/// `message_id` when the sender knows it; peers that predate the field simply
/// omit it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Conversation this message belongs to
    pub session_id: String,
    /// Unique per envelope, reused as the chat message id on receipt
    pub message_id: String,
    /// Raw UTF-8 text payload
    pub content: String,
    /// Creation time, set by the sender. Must be RFC 3339 with an offset
    /// (`Z` or `+hh:mm`); offsets are normalized to UTC. An envelope whose
    /// timestamp lacks an offset fails to decode and is dropped.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Builds a request for the given session with a fresh message id.
    pub fn request(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: new_message_id(),
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Request,
            correlation_id: None,
        }
    }

    /// Builds the response to `request`: same session, new id, timestamp now.
    pub fn response_to(request: &Envelope, content: impl Into<String>) -> Self {
        Self {
            session_id: request.session_id.clone(),
            message_id: new_message_id(),
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Response,
            correlation_id: Some(request.message_id.clone()),
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// First `max_chars` characters of the content, for log lines.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut preview: String = self.content.chars().take(max_chars).collect();
        if self.content.chars().count() > max_chars {
            preview.push_str("...");
        }
        preview
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
