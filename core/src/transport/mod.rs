//! Pub/sub transport abstraction
//!
//! The relay only needs a handful of primitives from the underlying network:
//! bootstrap, peer readiness, broadcast send, topic subscription and a live
//! peer count. Two implementations are provided:
//!
//! - [`WakuRestTransport`]: a live nwaku node driven over its REST API
//! - [`MemoryTransport`]: an in-process network for demos and tests

pub mod memory;
pub mod waku_rest;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use waku_rest::WakuRestTransport;

use crate::config::{TransportConfig, TransportKind};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked with every raw payload received on a topic.
///
/// Handlers run on the transport's delivery path and must not block.
pub type PayloadHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Outcome of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Number of peers that accepted the message
    pub acknowledged: usize,
}

/// Common trait for all pub/sub transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (for logging/debugging)
    fn name(&self) -> &'static str;

    /// Bring the local node up
    async fn start(&self) -> Result<(), TransportError>;

    /// Resolves once at least one remote peer is usable. May never resolve;
    /// callers race it against their own deadline.
    async fn wait_for_peers(&self) -> Result<(), TransportError>;

    /// Broadcast `payload` on `topic`
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<SendReport, TransportError>;

    /// Register `handler` for `topic`. A second call for the same topic
    /// replaces the previous handler.
    async fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<(), TransportError>;

    /// Number of currently reachable peers
    async fn peer_count(&self) -> usize;

    /// Best-effort shutdown of the local node
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Creates the transport selected by the configuration.
///
/// A memory transport built here joins a fresh, private network, so it never
/// sees peers; that is what the client's demo mode wants.
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match config.kind {
        TransportKind::Waku => Ok(Arc::new(WakuRestTransport::new(config)?)),
        TransportKind::Memory => Ok(Arc::new(MemoryNetwork::new().node())),
    }
}
