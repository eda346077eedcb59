//! Locally synthesized replies for when the relay cannot answer
//!
//! Every pending fallback is a spawned task tracked under its session, so a
//! session delete or an arriving response can cancel it. A fallback that
//! fires re-checks its session and is discarded if the session is gone.

use crate::chat::{ChatMessage, ChatStore};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

/// Why a simulated reply was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Connected, but the publish reached no peer
    PublishFailed,
    NotConnected,
    /// Published, but nothing came back in time
    ResponseTimeout,
}

impl FallbackReason {
    /// Content of the simulated reply
    pub fn message(&self) -> &'static str {
        match self {
            FallbackReason::PublishFailed => {
                "Sorry, I couldn't send your message via Waku. This is a simulated response."
            }
            FallbackReason::NotConnected => {
                "Waku network not connected. This is a simulated response. Please check your connection."
            }
            FallbackReason::ResponseTimeout => {
                "No response arrived from the inference service in time. This is a simulated response."
            }
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::PublishFailed => write!(f, "publish failed"),
            FallbackReason::NotConnected => write!(f, "not connected"),
            FallbackReason::ResponseTimeout => write!(f, "response timeout"),
        }
    }
}

struct PendingFallback {
    id: u64,
    reason: FallbackReason,
    /// User message the fallback would answer
    request_id: Option<String>,
    abort: AbortHandle,
}

type PendingMap = HashMap<String, Vec<PendingFallback>>;

#[derive(Clone)]
pub struct FallbackSimulator {
    store: Arc<ChatStore>,
    min_delay: Duration,
    max_delay: Duration,
    pending: Arc<Mutex<PendingMap>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for FallbackSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackSimulator")
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl FallbackSimulator {
    pub fn new(store: Arc<ChatStore>, window: (Duration, Duration)) -> Self {
        let (min_delay, max_delay) = window;
        Self {
            store,
            min_delay: min_delay.min(max_delay),
            max_delay: min_delay.max(max_delay),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn jitter(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Schedules one simulated reply after a random delay within the window.
    pub fn trigger(
        &self,
        session_id: &str,
        reason: FallbackReason,
        request_id: Option<String>,
    ) -> JoinHandle<Option<ChatMessage>> {
        let delay = self.jitter();
        info!(session_id, %reason, ?delay, "Scheduling simulated response");
        self.schedule(session_id, reason, delay, request_id)
    }

    /// Arms the response watchdog for a published request.
    pub fn arm_watchdog(&self, session_id: &str, request_id: &str, timeout: Duration) -> JoinHandle<Option<ChatMessage>> {
        debug!(session_id, request_id, ?timeout, "Arming response watchdog");
        self.schedule(
            session_id,
            FallbackReason::ResponseTimeout,
            timeout,
            Some(request_id.to_string()),
        )
    }

    /// Appends a simulated reply to `session_id` after `delay`, unless
    /// cancelled first. The task yields the appended message.
    pub fn schedule(
        &self,
        session_id: &str,
        reason: FallbackReason,
        delay: Duration,
        request_id: Option<String>,
    ) -> JoinHandle<Option<ChatMessage>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let simulator = self.clone();
        let session = session_id.to_string();
        let in_reply_to = request_id.clone();

        // Hold the map while spawning so the task cannot finish before it is registered
        let mut pending = self.pending();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            simulator.forget(&session, id);

            if !simulator.store.contains(&session) {
                debug!(session_id = %session, %reason, "Session gone, discarding simulated response");
                return None;
            }
            let message = ChatMessage::simulated(&session, reason.message(), in_reply_to);
            match simulator.store.append(message.clone()) {
                Ok(()) => {
                    info!(session_id = %session, %reason, "Delivered simulated response");
                    Some(message)
                }
                Err(e) => {
                    debug!(session_id = %session, error = %e, "Discarding simulated response");
                    None
                }
            }
        });
        pending.entry(session_id.to_string()).or_default().push(PendingFallback {
            id,
            reason,
            request_id,
            abort: handle.abort_handle(),
        });
        handle
    }

    fn forget(&self, session_id: &str, id: u64) {
        let mut pending = self.pending();
        if let Some(entries) = pending.get_mut(session_id) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                pending.remove(session_id);
            }
        }
    }

    /// Cancels every pending fallback of a session. Returns how many were cancelled.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let entries = self.pending().remove(session_id).unwrap_or_default();
        for entry in &entries {
            entry.abort.abort();
        }
        if !entries.is_empty() {
            debug!(session_id, cancelled = entries.len(), "Cancelled pending fallbacks");
        }
        entries.len()
    }

    /// Cancels response watchdogs after a response arrived. With a
    /// correlation id only the matching watchdog is cancelled, without one
    /// every watchdog of the session is.
    pub fn cancel_watchdog(&self, session_id: &str, correlation_id: Option<&str>) -> usize {
        let mut pending = self.pending();
        let Some(entries) = pending.get_mut(session_id) else {
            return 0;
        };

        let mut cancelled = 0;
        entries.retain(|entry| {
            let matches = entry.reason == FallbackReason::ResponseTimeout
                && correlation_id.map_or(true, |c| entry.request_id.as_deref() == Some(c));
            if matches {
                entry.abort.abort();
                cancelled += 1;
            }
            !matches
        });
        if entries.is_empty() {
            pending.remove(session_id);
        }
        cancelled
    }

    /// Number of fallbacks still waiting to fire for a session
    pub fn pending_count(&self, session_id: &str) -> usize {
        self.pending().get(session_id).map_or(0, Vec::len)
    }
}
