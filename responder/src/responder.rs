//! Request loop of the inference responder
//!
//! Subscribes to the request topic with a bounded number of attempts, then
//! answers every request envelope with exactly one response envelope on the
//! response topic. Each request is handled on its own task so a slow
//! generation never holds up delivery of the next request.

use crate::generator::ResponseGenerator;
use crate::stats::{ServiceStats, StatusReport};
use privacyai_core::{ConnectionManager, Envelope, EnvelopeHandler, MessageKind, Publisher, Subscriber, TopicConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Sent in place of a generated answer when generation fails
pub const APOLOGY: &str =
    "Service is unavailable. The AI service encountered an error and cannot process your request.";

/// Where the responder is in its subscribe lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Starting,
    /// 1-based attempt number
    SubscribeAttempt(u32),
    Listening,
    /// All subscribe attempts failed; the process stays up but answers nothing
    NotListening,
}

impl fmt::Display for ResponderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponderState::Starting => write!(f, "starting"),
            ResponderState::SubscribeAttempt(n) => write!(f, "subscribe attempt {}", n),
            ResponderState::Listening => write!(f, "listening"),
            ResponderState::NotListening => write!(f, "not listening"),
        }
    }
}

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Everything a request task needs, detached from the subscriber so the
/// request handler does not keep its own route alive.
#[derive(Clone)]
struct RequestContext {
    publisher: Publisher,
    generator: Arc<dyn ResponseGenerator>,
    response_topic: String,
    stats: Arc<ServiceStats>,
}

pub struct InferenceResponder {
    connection: Arc<ConnectionManager>,
    subscriber: Subscriber,
    context: RequestContext,
    request_topic: String,
    retry: RetryPolicy,
    state: watch::Sender<ResponderState>,
}

impl InferenceResponder {
    pub fn new(
        connection: Arc<ConnectionManager>,
        generator: Arc<dyn ResponseGenerator>,
        topics: &TopicConfig,
        retry: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ResponderState::Starting);
        Self {
            subscriber: Subscriber::new(Arc::clone(&connection)),
            context: RequestContext {
                publisher: Publisher::new(Arc::clone(&connection)),
                generator,
                response_topic: topics.response_topic.clone(),
                stats: Arc::new(ServiceStats::new()),
            },
            connection,
            request_topic: topics.request_topic.clone(),
            retry,
            state,
        }
    }

    pub fn state(&self) -> ResponderState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ResponderState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        Arc::clone(&self.context.stats)
    }

    /// Subscribes to the request topic, retrying up to the policy's limit.
    ///
    /// Ends in `Listening` or `NotListening`. Never returns an error: a
    /// responder that cannot subscribe keeps running so its status stays
    /// observable.
    pub async fn start(&self) -> ResponderState {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            self.state.send_replace(ResponderState::SubscribeAttempt(attempt));
            debug!(attempt, attempts, topic = %self.request_topic, "Subscribing to request topic");

            match self
                .subscriber
                .subscribe(&self.request_topic, MessageKind::Request, self.request_handler())
                .await
            {
                Ok(()) => {
                    self.state.send_replace(ResponderState::Listening);
                    info!(topic = %self.request_topic, "Listening for inference requests");
                    return ResponderState::Listening;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "Subscription failed, retrying in {:?}",
                        self.retry.backoff
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    error!(attempts, error = %e, "Giving up on request topic subscription");
                }
            }
        }

        self.state.send_replace(ResponderState::NotListening);
        ResponderState::NotListening
    }

    fn request_handler(&self) -> EnvelopeHandler {
        let context = self.context.clone();
        Arc::new(move |envelope: Envelope| {
            let context = context.clone();
            tokio::spawn(async move {
                context.handle_request(envelope).await;
            });
        })
    }

    pub async fn status_report(&self) -> StatusReport {
        let peers = self.connection.peer_count().await;
        self.context.stats.snapshot(self.connection.is_connected(), peers)
    }

    /// Logs a status line every `interval` until the task is aborted.
    pub fn spawn_status_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let responder = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = responder.status_report().await;
                info!(state = %responder.state(), "Status: {}", report);
            }
        })
    }
}

impl RequestContext {
    /// Generates and publishes the answer to one request. Returns whether the
    /// response was published.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, message_id = %request.message_id))]
    async fn handle_request(&self, request: Envelope) -> bool {
        self.stats.record_received();
        info!(content = %request.preview(100), "Processing inference request");

        let content = match self.generator.generate(&request.content).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                self.stats.record_generator_failure();
                warn!(provider = self.generator.provider_name(), "Generator returned an empty answer");
                APOLOGY.to_string()
            }
            Err(e) => {
                self.stats.record_generator_failure();
                error!(provider = self.generator.provider_name(), error = %e, "Generation failed");
                APOLOGY.to_string()
            }
        };

        let response = Envelope::response_to(&request, content);
        if self.publisher.publish(&self.response_topic, &response).await {
            self.stats.record_published();
            info!(response_id = %response.message_id, "Response sent");
            true
        } else {
            self.stats.record_publish_failure();
            error!(response_id = %response.message_id, "Failed to publish response");
            false
        }
    }
}
