//! In-process transport
//!
//! Nodes created from the same [`MemoryNetwork`] see each other as peers and
//! receive each other's broadcasts synchronously, in send order. Fault
//! injection hooks make bootstrap, subscription and send failures
//! reproducible in tests.

use super::{PayloadHandler, SendReport, Transport};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Default)]
struct NetworkState {
    online: HashSet<u64>,
    /// topic -> node id -> handler
    subscriptions: HashMap<String, HashMap<u64, PayloadHandler>>,
}

/// Shared medium connecting [`MemoryTransport`] nodes
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
    next_node_id: AtomicU64,
    joined: Notify,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryNetwork")
            .field("online", &state.online.len())
            .field("topics", &state.subscriptions.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a new node attached to this network. The node is offline until started.
    pub fn node(self: &Arc<Self>) -> MemoryTransport {
        let id = self.next_node_id.fetch_add(1, Ordering::Relaxed);
        MemoryTransport {
            id,
            network: Arc::clone(self),
            fail_start: AtomicBool::new(false),
            subscribe_failures: AtomicU32::new(0),
            reject_sends: AtomicBool::new(false),
            subscribe_latency_ms: AtomicU64::new(0),
        }
    }

    /// Delivers raw bytes to every subscriber of `topic`, as if a foreign
    /// peer had published them. Returns how many handlers were invoked.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers = self.handlers_for(topic, None);
        for handler in &handlers {
            handler(payload.to_vec());
        }
        handlers.len()
    }

    pub fn online_count(&self) -> usize {
        self.lock().online.len()
    }

    // The state lock is never held across user callbacks, so a poisoned lock
    // can only come from a panic inside this module; keep serving.
    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handlers_for(&self, topic: &str, exclude: Option<u64>) -> Vec<PayloadHandler> {
        let state = self.lock();
        state
            .subscriptions
            .get(topic)
            .map(|subs| {
                let mut ids: Vec<_> = subs.keys().copied().filter(|id| Some(*id) != exclude).collect();
                ids.sort_unstable();
                ids.into_iter().filter_map(|id| subs.get(&id).cloned()).collect()
            })
            .unwrap_or_default()
    }
}

/// A node on a [`MemoryNetwork`]
pub struct MemoryTransport {
    id: u64,
    network: Arc<MemoryNetwork>,
    fail_start: AtomicBool,
    subscribe_failures: AtomicU32,
    reject_sends: AtomicBool,
    subscribe_latency_ms: AtomicU64,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport").field("id", &self.id).finish()
    }
}

impl MemoryTransport {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Make the next `start` calls fail
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` subscribe calls fail
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Make sends fail while set
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Delay every subscribe call, successful or not, by `latency`
    pub fn subscribe_latency(&self, latency: Duration) {
        self.subscribe_latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn is_online(&self) -> bool {
        self.network.lock().online.contains(&self.id)
    }

    fn remote_peers(&self) -> usize {
        let state = self.network.lock();
        state.online.iter().filter(|id| **id != self.id).count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::Bootstrap(format!(
                "memory node {} refused to start",
                self.id
            )));
        }
        self.network.lock().online.insert(self.id);
        debug!(node = self.id, "Memory node joined network");
        self.network.joined.notify_waiters();
        Ok(())
    }

    async fn wait_for_peers(&self) -> Result<(), TransportError> {
        loop {
            // Register interest before checking, so a join in between is not missed
            let joined = self.network.joined.notified();
            if self.remote_peers() > 0 {
                return Ok(());
            }
            joined.await;
        }
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<SendReport, TransportError> {
        if !self.is_online() {
            return Err(TransportError::NotStarted);
        }
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected(format!(
                "memory node {} is rejecting sends",
                self.id
            )));
        }

        let acknowledged = self.remote_peers();
        let handlers = self.network.handlers_for(topic, Some(self.id));
        debug!(node = self.id, topic, receivers = handlers.len(), "Delivering memory broadcast");
        for handler in handlers {
            handler(payload.clone());
        }
        Ok(SendReport { acknowledged })
    }

    async fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<(), TransportError> {
        let latency = self.subscribe_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let pending_failures = self
            .subscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending_failures.is_ok() {
            warn!(node = self.id, topic, "Injected subscription failure");
            return Err(TransportError::Subscription(format!(
                "memory node {} failed to subscribe to {}",
                self.id, topic
            )));
        }
        if !self.is_online() {
            return Err(TransportError::NotStarted);
        }

        self.network
            .lock()
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(self.id, handler);
        debug!(node = self.id, topic, "Memory subscription registered");
        Ok(())
    }

    async fn peer_count(&self) -> usize {
        if self.is_online() {
            self.remote_peers()
        } else {
            0
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        state.online.remove(&self.id);
        for subs in state.subscriptions.values_mut() {
            subs.remove(&self.id);
        }
        info!(node = self.id, "Memory node left network");
        Ok(())
    }
}
