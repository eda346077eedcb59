//! Live transport backed by an nwaku node's REST API
//!
//! Publishing goes through the relay auto-sharding endpoints; inbound
//! messages are fetched by polling the per-topic message cache of the node.

use super::{PayloadHandler, SendReport, Transport};
use crate::config::TransportConfig;
use crate::errors::TransportError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayPublishRequest<'a> {
    payload: String,
    content_topic: &'a str,
    /// Unix time in nanoseconds
    timestamp: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RelayMessage {
    payload: String,
    #[serde(default)]
    content_topic: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WakuPeer {
    #[serde(default)]
    multiaddr: String,
    #[serde(default)]
    protocols: Vec<WakuPeerProtocol>,
}

#[derive(Deserialize, Debug)]
struct WakuPeerProtocol {
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    connected: bool,
}

impl WakuPeer {
    fn is_connected(&self) -> bool {
        self.protocols.iter().any(|p| p.connected)
    }
}

type HandlerMap = Arc<Mutex<HashMap<String, PayloadHandler>>>;

/// nwaku REST API client implementing [`Transport`]
pub struct WakuRestTransport {
    base_url: Url,
    http_client: Client,
    poll_interval: Duration,
    handlers: HandlerMap,
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for WakuRestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakuRestTransport")
            .field("base_url", &self.base_url.as_str())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WakuRestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let base_url = Url::parse(config.waku_rest_url.trim_end_matches('/'))
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", config.waku_rest_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidEndpoint(config.waku_rest_url.clone()));
        }

        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            poll_interval: config.poll_interval(),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            pollers: Mutex::new(HashMap::new()),
        })
    }

    /// Build an endpoint URL; each segment is percent-encoded, so content
    /// topics containing `/` stay a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        build_endpoint(&self.base_url, segments)
    }

    async fn fetch_peers(&self) -> Result<Vec<WakuPeer>, TransportError> {
        let response = self
            .http_client
            .get(self.endpoint(&["admin", "v1", "peers"])?)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        Ok(response.json::<Vec<WakuPeer>>().await?)
    }

    fn spawn_poller(&self, topic: &str) -> Result<JoinHandle<()>, TransportError> {
        let url = self.endpoint(&["relay", "v1", "auto", "messages", topic])?;
        let http_client = self.http_client.clone();
        let handlers = Arc::clone(&self.handlers);
        let interval = self.poll_interval;
        let topic = topic.to_string();

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let messages = match poll_messages(&http_client, &url).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Polling relay messages failed");
                        continue;
                    }
                };
                if messages.is_empty() {
                    continue;
                }
                trace!(topic = %topic, count = messages.len(), "Fetched relay messages");

                // Look the handler up per batch so a re-subscription takes effect
                let handler = lock(&handlers).get(&topic).cloned();
                let Some(handler) = handler else { continue };
                for message in messages {
                    if let Some(other) = message.content_topic.as_deref() {
                        if other != topic {
                            continue;
                        }
                    }
                    match BASE64.decode(message.payload.as_bytes()) {
                        Ok(bytes) => handler(bytes),
                        Err(e) => warn!(topic = %topic, error = %e, "Dropping relay message with invalid base64 payload"),
                    }
                }
            }
        }))
    }
}

fn build_endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransportError::HttpError {
        status_code: status.as_u16(),
        message,
    })
}

async fn poll_messages(http_client: &Client, url: &Url) -> Result<Vec<RelayMessage>, TransportError> {
    let response = http_client.get(url.clone()).send().await?;
    // An empty cache is sometimes reported as 404 by older nodes
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    let response = error_for_status(response).await?;
    Ok(response.json::<Vec<RelayMessage>>().await?)
}

#[async_trait]
impl Transport for WakuRestTransport {
    fn name(&self) -> &'static str {
        "waku-rest"
    }

    async fn start(&self) -> Result<(), TransportError> {
        let url = self.endpoint(&["health"])?;
        info!("Checking nwaku node at {}", self.base_url);
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Bootstrap(format!("nwaku node unreachable: {}", e)))?;
        error_for_status(response)
            .await
            .map_err(|e| TransportError::Bootstrap(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_peers(&self) -> Result<(), TransportError> {
        loop {
            match self.fetch_peers().await {
                Ok(peers) => {
                    let connected: Vec<&WakuPeer> = peers.iter().filter(|p| p.is_connected()).collect();
                    if !connected.is_empty() {
                        for peer in &connected {
                            let protocols: Vec<&str> = peer
                                .protocols
                                .iter()
                                .filter(|p| p.connected)
                                .map(|p| p.protocol.as_str())
                                .collect();
                            debug!(multiaddr = %peer.multiaddr, ?protocols, "Remote peer ready");
                        }
                        return Ok(());
                    }
                    debug!("No connected peers yet");
                }
                Err(e) => warn!(error = %e, "Failed to query peers"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<SendReport, TransportError> {
        let body = RelayPublishRequest {
            payload: BASE64.encode(&payload),
            content_topic: topic,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        };
        let response = self
            .http_client
            .post(self.endpoint(&["relay", "v1", "auto", "messages"])?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{}: {}", status, message)));
        }
        // The node accepted the message for relay; it is the peer we can observe
        Ok(SendReport { acknowledged: 1 })
    }

    async fn subscribe(&self, topic: &str, handler: PayloadHandler) -> Result<(), TransportError> {
        let response = self
            .http_client
            .post(self.endpoint(&["relay", "v1", "auto", "subscriptions"])?)
            .json(&[topic])
            .send()
            .await
            .map_err(|e| TransportError::Subscription(e.to_string()))?;
        error_for_status(response)
            .await
            .map_err(|e| TransportError::Subscription(e.to_string()))?;

        lock(&self.handlers).insert(topic.to_string(), handler);

        let mut pollers = lock(&self.pollers);
        if !pollers.contains_key(topic) {
            let poller = self.spawn_poller(topic)?;
            pollers.insert(topic.to_string(), poller);
            info!(topic, interval = ?self.poll_interval, "Started polling relay topic");
        }
        Ok(())
    }

    async fn peer_count(&self) -> usize {
        match self.fetch_peers().await {
            Ok(peers) => peers.iter().filter(|p| p.is_connected()).count(),
            Err(e) => {
                warn!(error = %e, "Failed to query peers");
                0
            }
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let topics: Vec<String> = {
            let mut pollers = lock(&self.pollers);
            for (_, poller) in pollers.iter() {
                poller.abort();
            }
            pollers.drain().map(|(topic, _)| topic).collect()
        };
        lock(&self.handlers).clear();

        if topics.is_empty() {
            return Ok(());
        }
        let response = self
            .http_client
            .delete(self.endpoint(&["relay", "v1", "auto", "subscriptions"])?)
            .json(&topics)
            .send()
            .await?;
        error_for_status(response).await?;
        info!(count = topics.len(), "Unsubscribed relay topics");
        Ok(())
    }
}

impl Drop for WakuRestTransport {
    fn drop(&mut self) {
        for (_, poller) in lock(&self.pollers).drain() {
            poller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str) -> Result<WakuRestTransport, TransportError> {
        WakuRestTransport::new(&TransportConfig {
            waku_rest_url: url.to_string(),
            ..TransportConfig::default()
        })
    }

    #[test]
    fn test_topic_is_one_encoded_segment() {
        let transport = transport("http://127.0.0.1:8645/").unwrap();
        let url = transport
            .endpoint(&["relay", "v1", "auto", "messages", "/privacyai/1/chat-request/proto"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8645/relay/v1/auto/messages/%2Fprivacyai%2F1%2Fchat-request%2Fproto"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let transport = transport("http://node.local/waku").unwrap();
        let url = transport.endpoint(&["health"]).unwrap();
        assert_eq!(url.as_str(), "http://node.local/waku/health");
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(matches!(transport("not a url"), Err(TransportError::InvalidEndpoint(_))));
        assert!(matches!(transport("mailto:node@example.com"), Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_peer_connectivity_parsing() {
        let raw = r#"[
            {"multiaddr": "/ip4/10.0.0.1/tcp/60000/p2p/16Uiu2", "protocols": [
                {"protocol": "/vac/waku/relay/2.0.0", "connected": true},
                {"protocol": "/vac/waku/filter-subscribe/2.0.0-beta1", "connected": false}
            ]},
            {"multiaddr": "/ip4/10.0.0.2/tcp/60000/p2p/16Uiu3", "protocols": [
                {"protocol": "/vac/waku/relay/2.0.0", "connected": false}
            ]}
        ]"#;
        let peers: Vec<WakuPeer> = serde_json::from_str(raw).unwrap();
        assert_eq!(peers.iter().filter(|p| p.is_connected()).count(), 1);
    }

    #[test]
    fn test_publish_body_shape() {
        let body = RelayPublishRequest {
            payload: BASE64.encode(br#"{"content":"Hello"}"#),
            content_topic: "/privacyai/1/chat-request/proto",
            timestamp: 1,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contentTopic"], "/privacyai/1/chat-request/proto");
        assert_eq!(
            BASE64.decode(value["payload"].as_str().unwrap()).unwrap(),
            br#"{"content":"Hello"}"#.to_vec()
        );
    }
}
