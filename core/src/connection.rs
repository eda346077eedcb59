//! Transport lifecycle and connection status tracking
//!
//! The manager owns the process' single transport handle. Status moves along
//! `Idle -> Connecting -> {Connected, Degraded}`; an explicit [`ConnectionManager::shutdown`]
//! is the only way into `Disconnected`. The manager never retries on its own.

use crate::errors::TransportError;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Process-wide connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    /// Transport exists but peer readiness failed or timed out
    Degraded,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Degraded => "degraded",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// How long `connect` waits for peer readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// `None` waits indefinitely
    pub peer_timeout: Option<Duration>,
}

impl ConnectPolicy {
    /// Bounded wait, used by the chat client (30s, or shorter in demo mode)
    pub fn bounded(peer_timeout: Duration) -> Self {
        Self {
            peer_timeout: Some(peer_timeout),
        }
    }

    /// Unbounded wait, used by the responder
    pub fn unbounded() -> Self {
        Self { peer_timeout: None }
    }
}

/// Owns the transport and its connection status
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    policy: ConnectPolicy,
    status: watch::Sender<ConnectionStatus>,
    last_error: Mutex<Option<String>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ConnectPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            transport,
            policy,
            status,
            last_error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Receiver that observes every status change
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Why the last `connect` ended in `Degraded`, if it did
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// The transport handle, handed out only while connected
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.is_connected().then(|| Arc::clone(&self.transport))
    }

    /// Live peer count; zero unless connected
    pub async fn peer_count(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        self.transport.peer_count().await
    }

    /// Bootstraps the transport and waits for peer readiness.
    ///
    /// Only the first call does work. Calls made while connecting, connected,
    /// degraded or after shutdown return the current status unchanged.
    pub async fn connect(&self) -> ConnectionStatus {
        let claimed = self.status.send_if_modified(|status| {
            if *status == ConnectionStatus::Idle {
                *status = ConnectionStatus::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            let current = self.status();
            debug!(status = %current, "connect() ignored, connection already initiated");
            return current;
        }
        info!(transport = self.transport.name(), "Connection status: idle -> connecting");

        match self.bootstrap().await {
            Ok(peers) => {
                self.transition(ConnectionStatus::Connected);
                info!(peers, "Connection status: connecting -> connected");
            }
            Err(e) => {
                self.set_last_error(e.to_string());
                self.transition(ConnectionStatus::Degraded);
                warn!(error = %e, "Connection status: connecting -> degraded");
            }
        }
        self.status()
    }

    async fn bootstrap(&self) -> Result<usize, TransportError> {
        self.transport.start().await?;

        match self.policy.peer_timeout {
            Some(deadline) => {
                debug!(?deadline, "Waiting for remote peers");
                tokio::time::timeout(deadline, self.transport.wait_for_peers())
                    .await
                    .map_err(|_| TransportError::PeerTimeout(deadline))??;
            }
            None => {
                info!("Waiting for remote peers (no deadline)");
                self.transport.wait_for_peers().await?;
            }
        }

        Ok(self.transport.peer_count().await)
    }

    /// Stops the transport and moves to `Disconnected`. Best effort: stop
    /// errors are logged, not returned.
    pub async fn shutdown(&self) {
        let previous = self.status();
        if previous == ConnectionStatus::Disconnected {
            return;
        }
        if let Err(e) = self.transport.stop().await {
            error!(error = %e, "Failed to stop transport cleanly");
        }
        self.transition(ConnectionStatus::Disconnected);
        info!(from = %previous, "Connection status: {} -> disconnected", previous);
    }

    fn transition(&self, next: ConnectionStatus) {
        self.status.send_replace(next);
    }

    fn set_last_error(&self, message: String) {
        match self.last_error.lock() {
            Ok(mut slot) => *slot = Some(message),
            Err(poisoned) => *poisoned.into_inner() = Some(message),
        }
    }
}
