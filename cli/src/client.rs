use crate::chat::{ChatError, ChatMessage, ChatStore};
use crate::fallback::{FallbackReason, FallbackSimulator};
use privacyai_core::{
    ClientConfig, ConnectionManager, ConnectionStatus, Envelope, EnvelopeHandler, MessageKind, Publisher, Subscriber,
    TopicConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to at least one peer; the response watchdog is armed
    Published { request_id: String },
    /// A simulated reply is scheduled instead
    Fallback { request_id: String, reason: FallbackReason },
}

impl SendOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            SendOutcome::Published { request_id } | SendOutcome::Fallback { request_id, .. } => request_id,
        }
    }
}

/// Chat side of the relay: sends user messages as request envelopes and
/// files response envelopes under their sessions.
pub struct ChatClient {
    connection: Arc<ConnectionManager>,
    publisher: Publisher,
    subscriber: Subscriber,
    store: Arc<ChatStore>,
    fallback: FallbackSimulator,
    topics: TopicConfig,
    response_timeout: Duration,
}

impl ChatClient {
    pub fn new(connection: Arc<ConnectionManager>, topics: TopicConfig, config: &ClientConfig) -> Self {
        let store = Arc::new(ChatStore::new());
        Self {
            publisher: Publisher::new(Arc::clone(&connection)),
            subscriber: Subscriber::new(Arc::clone(&connection)),
            fallback: FallbackSimulator::new(Arc::clone(&store), config.fallback_window()),
            connection,
            store,
            topics,
            response_timeout: config.response_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn fallback(&self) -> &FallbackSimulator {
        &self.fallback
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub async fn peer_count(&self) -> usize {
        self.connection.peer_count().await
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Connects and, once connected, listens on the response topic.
    ///
    /// Never fails: without a connection or a subscription the client keeps
    /// working in fallback-only mode.
    pub async fn start(&self) -> ConnectionStatus {
        let status = self.connection.connect().await;
        if status != ConnectionStatus::Connected {
            warn!(
                %status,
                reason = self.connection.last_error().as_deref().unwrap_or("unknown"),
                "Relay unavailable, responses will be simulated"
            );
            return status;
        }

        if let Err(e) = self
            .subscriber
            .subscribe(&self.topics.response_topic, MessageKind::Response, self.response_handler())
            .await
        {
            warn!(error = %e, topic = %self.topics.response_topic, "Failed to subscribe to responses");
        }
        status
    }

    fn response_handler(&self) -> EnvelopeHandler {
        let store = Arc::clone(&self.store);
        let fallback = self.fallback.clone();
        Arc::new(move |envelope: Envelope| {
            if !store.contains(&envelope.session_id) {
                debug!(session_id = %envelope.session_id, "Response for unknown session, dropping");
                return;
            }
            fallback.cancel_watchdog(&envelope.session_id, envelope.correlation_id.as_deref());
            if let Err(e) = store.append(ChatMessage::from_response(&envelope)) {
                debug!(error = %e, "Response session vanished, dropping");
            }
        })
    }

    /// Stores the message in the current session and relays it. Falls back to
    /// a simulated reply when the relay cannot take it.
    pub async fn send_message(&self, content: &str) -> Result<SendOutcome, ChatError> {
        let message = self.store.record_user_message(content)?;
        let session_id = message.session_id.clone();

        if !self.connection.is_connected() {
            self.fallback
                .trigger(&session_id, FallbackReason::NotConnected, Some(message.id.clone()));
            return Ok(SendOutcome::Fallback {
                request_id: message.id,
                reason: FallbackReason::NotConnected,
            });
        }

        let envelope = Envelope {
            session_id: session_id.clone(),
            message_id: message.id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            kind: MessageKind::Request,
            correlation_id: None,
        };

        // Armed before publishing: a fast reply may arrive before publish returns
        self.fallback
            .arm_watchdog(&session_id, &message.id, self.response_timeout);

        if self.publisher.publish(&self.topics.request_topic, &envelope).await {
            info!(session_id = %session_id, message_id = %message.id, "Message relayed");
            Ok(SendOutcome::Published { request_id: message.id })
        } else {
            self.fallback.cancel_watchdog(&session_id, Some(&message.id));
            self.fallback
                .trigger(&session_id, FallbackReason::PublishFailed, Some(message.id.clone()));
            Ok(SendOutcome::Fallback {
                request_id: message.id,
                reason: FallbackReason::PublishFailed,
            })
        }
    }

    /// Deletes a session along with its pending fallbacks.
    pub fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        self.fallback.cancel_session(session_id);
        self.store.delete_session(session_id)
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatEvent, MessageOrigin, Role};
    use privacyai_core::transport::{MemoryNetwork, PayloadHandler, Transport};
    use privacyai_core::ConnectPolicy;
    use privacyai_ipc::{decode, encode};
    use std::sync::Mutex;

    fn client_on(network: &Arc<MemoryNetwork>, peer_timeout: Duration) -> ChatClient {
        let transport: Arc<dyn Transport> = Arc::new(network.node());
        let connection = Arc::new(ConnectionManager::new(transport, ConnectPolicy::bounded(peer_timeout)));
        ChatClient::new(connection, TopicConfig::default(), &ClientConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_peers_yields_one_simulated_message() {
        let network = MemoryNetwork::new();
        let peer = network.node();
        peer.start().await.unwrap();
        let client = client_on(&network, Duration::from_secs(30));
        assert_eq!(client.start().await, ConnectionStatus::Connected);

        // The only peer leaves; the client still believes it is connected
        peer.stop().await.unwrap();
        let session = client.store().create_session();
        let outcome = client.send_message("Hello").await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Fallback { reason: FallbackReason::PublishFailed, .. }
        ));

        tokio::time::sleep(Duration::from_millis(2600)).await;
        let messages = client.store().messages(&session.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].origin, MessageOrigin::Simulated);
        assert_eq!(messages[1].in_reply_to.as_deref(), Some(outcome.request_id()));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(client.store().messages(&session.id).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_client_still_answers() {
        let network = MemoryNetwork::new();
        let client = client_on(&network, Duration::from_secs(5));
        assert_eq!(client.start().await, ConnectionStatus::Degraded);

        let session = client.store().create_session();
        let outcome = client.send_message("Hello").await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Fallback { reason: FallbackReason::NotConnected, .. }
        ));

        tokio::time::sleep(Duration::from_millis(2600)).await;
        let messages = client.store().messages(&session.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, FallbackReason::NotConnected.message());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_session_cancels_fallback() {
        let network = MemoryNetwork::new();
        let client = client_on(&network, Duration::from_secs(1));
        client.start().await;

        let doomed = client.store().create_session();
        let mut events = client.store().subscribe();
        client.send_message("Hello").await.unwrap();
        client.delete_session(&doomed.id).unwrap();
        assert_eq!(client.fallback().pending_count(&doomed.id), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut appended = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ChatEvent::MessageAppended(ref m) if m.role == Role::Assistant) {
                appended += 1;
            }
        }
        assert_eq!(appended, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_lands_in_its_session_and_disarms_watchdog() {
        let network = MemoryNetwork::new();
        let responder = network.node();
        responder.start().await.unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&requests);
        let handler: PayloadHandler = Arc::new(move |bytes| sink.lock().unwrap().push(decode(&bytes).unwrap()));
        let topics = TopicConfig::default();
        responder.subscribe(&topics.request_topic, handler).await.unwrap();

        let client = client_on(&network, Duration::from_secs(5));
        assert_eq!(client.start().await, ConnectionStatus::Connected);
        let first = client.store().create_session();
        let outcome = client.send_message("Hello").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Published { .. }));
        assert_eq!(client.fallback().pending_count(&first.id), 1);

        // User switches away before the answer arrives
        client.store().create_session();
        let request: Envelope = requests.lock().unwrap()[0].clone();
        assert_eq!(request.message_id, outcome.request_id());
        let response = Envelope::response_to(&request, "Hi there");
        responder
            .send(&topics.response_topic, encode(&response).unwrap())
            .await
            .unwrap();

        let messages = client.store().messages(&first.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(messages[1].origin, MessageOrigin::Relay);
        assert_eq!(client.fallback().pending_count(&first.id), 0);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(client.store().messages(&first.id).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_without_response() {
        let network = MemoryNetwork::new();
        network.node().start().await.unwrap();
        let client = client_on(&network, Duration::from_secs(5));
        client.start().await;
        let session = client.store().create_session();

        assert!(matches!(
            client.send_message("Anyone there?").await.unwrap(),
            SendOutcome::Published { .. }
        ));
        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(client.store().messages(&session.id).unwrap().len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let messages = client.store().messages(&session.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, FallbackReason::ResponseTimeout.message());
    }

    #[tokio::test]
    async fn test_send_validation() {
        let network = MemoryNetwork::new();
        let client = client_on(&network, Duration::from_millis(10));
        assert_eq!(client.send_message("Hello").await, Err(ChatError::NoSession));
        client.store().create_session();
        assert_eq!(client.send_message("  ").await, Err(ChatError::EmptyMessage));
    }
}
