use serde::{Deserialize, Serialize};

pub const DEFAULT_REQUEST_TOPIC: &str = "/privacyai/1/chat-request/proto";
pub const DEFAULT_RESPONSE_TOPIC: &str = "/privacyai/1/chat-response/proto";

/// The two content topics client and responder rendezvous on.
///
/// Both processes must agree on these strings or no message is ever seen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TopicConfig {
    pub request_topic: String,
    pub response_topic: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            request_topic: DEFAULT_REQUEST_TOPIC.to_string(),
            response_topic: DEFAULT_RESPONSE_TOPIC.to_string(),
        }
    }
}
