// This crate holds the relay protocol core shared by the chat client and the
// inference responder:
// - Transport abstraction with live (nwaku REST) and in-memory implementations
// - Connection lifecycle and status tracking
// - Envelope publisher and topic subscriber
// - Unified configuration loading
// - Shared error types

pub mod config;
pub use config::*;

pub mod connection;
pub use connection::{ConnectPolicy, ConnectionManager, ConnectionStatus};

pub mod errors;
pub use errors::*;

pub mod publisher;
pub use publisher::Publisher;

pub mod subscriber;
pub use subscriber::{EnvelopeHandler, Subscriber};

pub mod transport;
pub use transport::{create_transport, PayloadHandler, SendReport, Transport};

// Wire types are re-exported so downstream crates need a single import path
pub use privacyai_ipc::{Envelope, MessageKind, TopicConfig};
