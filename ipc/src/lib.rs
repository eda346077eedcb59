// This crate centralizes the wire definitions shared by the chat client and
// the inference responder.

pub mod relay_message; // Envelope shape and JSON codec
pub mod topics; // Content topics both sides rendezvous on

pub use relay_message::{decode, encode, CodecError, Envelope, MessageKind};
pub use topics::TopicConfig;
