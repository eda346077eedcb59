use crate::connection::ConnectionManager;
use crate::errors::{RelayError, RelayResult};
use crate::transport::PayloadHandler;
use privacyai_ipc::{decode, Envelope, MessageKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, trace, warn};

/// Callback receiving decoded envelopes of the subscribed kind
pub type EnvelopeHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

#[derive(Clone)]
struct Route {
    kind: MessageKind,
    handler: EnvelopeHandler,
}

/// Current route of a topic. Swapped in place on re-subscription.
type RouteSlot = Arc<RwLock<Route>>;

/// Decodes inbound payloads and dispatches them to one handler per topic.
///
/// The transport sees exactly one decoder per topic; re-subscribing only swaps
/// the route behind it, so envelopes already dispatched are unaffected.
#[derive(Clone)]
pub struct Subscriber {
    connection: Arc<ConnectionManager>,
    routes: Arc<Mutex<HashMap<String, RouteSlot>>>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topics", &self.topics())
            .finish()
    }
}

impl Subscriber {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            routes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<String, RouteSlot>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Topics with an active route
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Route envelopes of `kind` arriving on `topic` to `handler`.
    pub async fn subscribe(&self, topic: &str, kind: MessageKind, handler: EnvelopeHandler) -> RelayResult<()> {
        let Some(transport) = self.connection.transport() else {
            return Err(RelayError::NotConnected(self.connection.status()));
        };

        let route = Route { kind, handler };
        let slot = {
            let mut routes = self.routes();
            if let Some(existing) = routes.get(topic) {
                match existing.write() {
                    Ok(mut current) => *current = route,
                    Err(poisoned) => *poisoned.into_inner() = route,
                }
                info!(topic, %kind, "Replaced subscription handler");
                return Ok(());
            }
            let slot: RouteSlot = Arc::new(RwLock::new(route));
            routes.insert(topic.to_string(), Arc::clone(&slot));
            slot
        };

        let decoder = decoder_for(topic, slot);
        if let Err(e) = transport.subscribe(topic, decoder).await {
            self.routes().remove(topic);
            return Err(e.into());
        }
        info!(topic, %kind, "Subscribed to topic");
        Ok(())
    }
}

fn decoder_for(topic: &str, slot: RouteSlot) -> PayloadHandler {
    let topic = topic.to_string();
    Arc::new(move |payload: Vec<u8>| {
        let envelope = match decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %topic, bytes = payload.len(), error = %e, "Dropping malformed payload");
                return;
            }
        };

        let route = match slot.read() {
            Ok(route) => route.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if envelope.kind != route.kind {
            trace!(topic = %topic, kind = %envelope.kind, "Ignoring envelope of other kind");
            return;
        }
        debug!(
            topic = %topic,
            session_id = %envelope.session_id,
            message_id = %envelope.message_id,
            "Dispatching envelope"
        );
        (route.handler)(envelope);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectPolicy, ConnectionStatus};
    use crate::transport::{MemoryNetwork, Transport};
    use privacyai_ipc::encode;

    fn collector() -> (EnvelopeHandler, Arc<Mutex<Vec<Envelope>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EnvelopeHandler = Arc::new(move |envelope| sink.lock().unwrap().push(envelope));
        (handler, seen)
    }

    async fn connected_subscriber(network: &Arc<MemoryNetwork>) -> (Arc<crate::transport::MemoryTransport>, Subscriber) {
        network.node().start().await.unwrap();
        let node = Arc::new(network.node());
        let transport: Arc<dyn Transport> = node.clone();
        let manager = Arc::new(ConnectionManager::new(transport, ConnectPolicy::unbounded()));
        assert_eq!(manager.connect().await, ConnectionStatus::Connected);
        (node, Subscriber::new(manager))
    }

    #[tokio::test]
    async fn test_dispatches_matching_kind_in_order() {
        let network = MemoryNetwork::new();
        let (_, subscriber) = connected_subscriber(&network).await;
        let (handler, seen) = collector();
        subscriber.subscribe("/resp", MessageKind::Response, handler).await.unwrap();

        let request = Envelope::request("S1", "Hello");
        let first = Envelope::response_to(&request, "one");
        let second = Envelope::response_to(&request, "two");
        network.inject("/resp", &encode(&first).unwrap());
        network.inject("/resp", &encode(&request).unwrap());
        network.inject("/resp", &encode(&second).unwrap());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].content, "one");
        assert_eq!(seen[1].content, "two");
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let network = MemoryNetwork::new();
        let (_, subscriber) = connected_subscriber(&network).await;
        let (handler, seen) = collector();
        subscriber.subscribe("/req", MessageKind::Request, handler).await.unwrap();

        for payload in [&b""[..], b"{", b"\xff\xfe", br#"{"type":"request"}"#, b"null"] {
            assert_eq!(network.inject("/req", payload), 1);
        }
        assert!(seen.lock().unwrap().is_empty());

        // The decoder is still alive afterwards
        network.inject("/req", &encode(&Envelope::request("S1", "ok")).unwrap());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_handler_for_later_messages() {
        let network = MemoryNetwork::new();
        let (_, subscriber) = connected_subscriber(&network).await;
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();

        subscriber.subscribe("/req", MessageKind::Request, first).await.unwrap();
        network.inject("/req", &encode(&Envelope::request("S1", "a")).unwrap());
        subscriber.subscribe("/req", MessageKind::Request, second).await.unwrap();
        network.inject("/req", &encode(&Envelope::request("S1", "b")).unwrap());

        assert_eq!(first_seen.lock().unwrap().len(), 1);
        assert_eq!(first_seen.lock().unwrap()[0].content, "a");
        assert_eq!(second_seen.lock().unwrap().len(), 1);
        assert_eq!(second_seen.lock().unwrap()[0].content, "b");
        assert_eq!(subscriber.topics(), vec!["/req".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.node());
        let manager = Arc::new(ConnectionManager::new(transport, ConnectPolicy::unbounded()));
        let subscriber = Subscriber::new(manager);
        let (handler, _) = collector();

        let result = subscriber.subscribe("/req", MessageKind::Request, handler).await;
        assert!(matches!(result, Err(RelayError::NotConnected(ConnectionStatus::Idle))));
        assert!(subscriber.topics().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transport_subscription_leaves_no_route() {
        let network = MemoryNetwork::new();
        let (node, subscriber) = connected_subscriber(&network).await;
        node.fail_next_subscriptions(1);
        let (handler, _) = collector();

        assert!(subscriber.subscribe("/req", MessageKind::Request, handler.clone()).await.is_err());
        assert!(subscriber.topics().is_empty());
        assert!(subscriber.subscribe("/req", MessageKind::Request, handler).await.is_ok());
    }
}
