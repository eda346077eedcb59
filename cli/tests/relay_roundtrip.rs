use async_trait::async_trait;
use privacyai_cli::{ChatClient, ChatEvent, MessageOrigin, Role, SendOutcome};
use privacyai_core::transport::{MemoryNetwork, Transport};
use privacyai_core::{ClientConfig, ConnectPolicy, ConnectionManager, ConnectionStatus, TopicConfig};
use privacyai_responder::{InferenceResponder, ResponderState, ResponseGenerator, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

struct Scripted;

#[async_trait]
impl ResponseGenerator for Scripted {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(if prompt == "Hello" { "Hi there".to_string() } else { format!("echo: {}", prompt) })
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}

fn manager(network: &Arc<MemoryNetwork>, policy: ConnectPolicy) -> Arc<ConnectionManager> {
    let transport: Arc<dyn Transport> = Arc::new(network.node());
    Arc::new(ConnectionManager::new(transport, policy))
}

#[tokio::test]
async fn test_hello_roundtrip_over_memory_network() {
    let network = MemoryNetwork::new();
    let topics = TopicConfig::default();

    let responder_connection = manager(&network, ConnectPolicy::unbounded());
    let responder = InferenceResponder::new(
        Arc::clone(&responder_connection),
        Arc::new(Scripted),
        &topics,
        RetryPolicy::default(),
    );
    let client = ChatClient::new(
        manager(&network, ConnectPolicy::bounded(Duration::from_secs(5))),
        topics.clone(),
        &ClientConfig::default(),
    );

    let (responder_status, client_status) = tokio::join!(responder_connection.connect(), client.start());
    assert_eq!(responder_status, ConnectionStatus::Connected);
    assert_eq!(client_status, ConnectionStatus::Connected);
    assert_eq!(responder.start().await, ResponderState::Listening);

    let session = client.store().create_session();
    let mut events = client.store().subscribe();
    let outcome = client.send_message("Hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Published { .. }));

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ChatEvent::MessageAppended(message)) = events.recv().await {
                if message.role == Role::Assistant {
                    return message;
                }
            }
        }
    })
    .await
    .expect("reply within 5s");

    assert_eq!(reply.session_id, session.id);
    assert_eq!(reply.content, "Hi there");
    assert_eq!(reply.origin, MessageOrigin::Relay);
    assert_eq!(reply.in_reply_to.as_deref(), Some(outcome.request_id()));
    assert_eq!(client.fallback().pending_count(&session.id), 0);

    let messages = client.store().messages(&session.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(responder.stats().received(), 1);
    assert_eq!(responder.stats().published(), 1);

    client.shutdown().await;
    responder_connection.shutdown().await;
}

#[tokio::test]
async fn test_replies_stay_with_their_sessions() {
    let network = MemoryNetwork::new();
    let topics = TopicConfig::default();

    let responder_connection = manager(&network, ConnectPolicy::unbounded());
    let responder = InferenceResponder::new(
        Arc::clone(&responder_connection),
        Arc::new(Scripted),
        &topics,
        RetryPolicy::default(),
    );
    let client = ChatClient::new(
        manager(&network, ConnectPolicy::bounded(Duration::from_secs(5))),
        topics,
        &ClientConfig::default(),
    );
    tokio::join!(responder_connection.connect(), client.start());
    responder.start().await;

    let mut events = client.store().subscribe();
    let first = client.store().create_session();
    client.send_message("one").await.unwrap();
    let second = client.store().create_session();
    client.send_message("two").await.unwrap();

    let mut replies = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while replies < 2 {
            if let Ok(ChatEvent::MessageAppended(message)) = events.recv().await {
                if message.role == Role::Assistant {
                    replies += 1;
                }
            }
        }
    })
    .await
    .expect("both replies within 5s");

    let first_messages = client.store().messages(&first.id).unwrap();
    let second_messages = client.store().messages(&second.id).unwrap();
    assert_eq!(first_messages[1].content, "echo: one");
    assert_eq!(second_messages[1].content, "echo: two");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_instant_replies_never_time_out() {
    let network = MemoryNetwork::new();
    let topics = TopicConfig::default();

    let responder_connection = manager(&network, ConnectPolicy::unbounded());
    let responder = InferenceResponder::new(
        Arc::clone(&responder_connection),
        Arc::new(Scripted),
        &topics,
        RetryPolicy::default(),
    );
    let config = ClientConfig {
        response_timeout_secs: 1,
        ..ClientConfig::default()
    };
    let client = ChatClient::new(
        manager(&network, ConnectPolicy::bounded(Duration::from_secs(5))),
        topics,
        &config,
    );
    tokio::join!(responder_connection.connect(), client.start());
    assert_eq!(responder.start().await, ResponderState::Listening);

    let mut sessions = Vec::new();
    for i in 0..100 {
        sessions.push(client.store().create_session().id);
        let outcome = client.send_message(&format!("ping {}", i)).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Published { .. }));
    }

    // Past the response timeout, so any watchdog that missed its reply has fired
    tokio::time::sleep(Duration::from_millis(1500)).await;

    for session in &sessions {
        let messages = client.store().messages(session).unwrap();
        let origins: Vec<MessageOrigin> = messages.iter().map(|m| m.origin).collect();
        assert_eq!(origins, vec![MessageOrigin::User, MessageOrigin::Relay], "session {}", session);
        assert_eq!(client.fallback().pending_count(session), 0);
    }
    assert_eq!(responder.stats().published(), 100);

    client.shutdown().await;
    responder_connection.shutdown().await;
}
