// Chat client for the privacy relay:
// - Chat sessions and message store
// - Relay client publishing requests and filing responses
// - Simulated replies when the relay cannot answer

pub mod chat;
pub use chat::{ChatError, ChatEvent, ChatMessage, ChatSession, ChatStore, MessageOrigin, Role};

pub mod client;
pub use client::{ChatClient, SendOutcome};

pub mod fallback;
pub use fallback::{FallbackReason, FallbackSimulator};
