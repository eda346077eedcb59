use crate::connection::ConnectionManager;
use privacyai_ipc::{encode, Envelope};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Sends envelopes on a topic through the connection's transport.
///
/// `publish` never retries; a `false` result is the caller's cue to fall back.
#[derive(Debug, Clone)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
}

impl Publisher {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Returns `true` when at least one peer accepted the envelope.
    ///
    /// Returns `false` without any transport I/O when not connected, and
    /// without attempting a send when no peer is reachable.
    #[instrument(skip(self, envelope), fields(session_id = %envelope.session_id, message_id = %envelope.message_id))]
    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> bool {
        let Some(transport) = self.connection.transport() else {
            warn!(status = %self.connection.status(), "Cannot publish, transport not connected");
            return false;
        };

        let payload = match encode(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode envelope");
                return false;
            }
        };

        let peers = transport.peer_count().await;
        if peers == 0 {
            warn!("No peers available for sending message");
            return false;
        }
        debug!(topic, peers, kind = %envelope.kind, content = %envelope.preview(50), "Publishing envelope");

        match transport.send(topic, payload).await {
            Ok(report) if report.acknowledged > 0 => {
                info!(topic, acknowledged = report.acknowledged, "Envelope sent");
                true
            }
            Ok(_) => {
                warn!(topic, "Envelope reached no peers");
                false
            }
            Err(e) => {
                error!(topic, error = %e, "Failed to send envelope");
                false
            }
        }
    }
}
