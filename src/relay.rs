//! Inbound routing: decode overlay messages, keep the ones addressed to this
//! node, and hand them to the relay endpoint over HTTP.

use crate::error::{HosterError, Result};
use crate::identity::PeerIdentity;
use crate::metrics;
use crate::protocol::{RelayEnvelope, TunnelMessage};
use crate::retry::{RetryExecutor, RetryStrategy};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelopes waiting for the relay worker before new ones are dropped.
pub const RELAY_QUEUE_CAPACITY: usize = 1024;

/// POSTs `{to, payload}` envelopes to the relay endpoint.
#[derive(Clone)]
pub struct RelayForwarder {
    client: reqwest::Client,
    url: String,
    retry: RetryExecutor,
}

impl RelayForwarder {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .map_err(|e| HosterError::Config(format!("Failed to build relay client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            retry: RetryExecutor::new(RetryStrategy::relay_default()),
        })
    }

    pub fn with_retry(mut self, strategy: RetryStrategy) -> Self {
        self.retry = RetryExecutor::new(strategy);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn forward(&self, envelope: &RelayEnvelope) -> Result<()> {
        let result = self.retry.execute(|| self.post_once(envelope)).await;
        match &result {
            Ok(()) => metrics::RELAY_FORWARDS.inc(),
            Err(e) => {
                metrics::RELAY_FAILURES.inc();
                error!(url = %self.url, to = %envelope.to, code = e.code(), "Relay forward failed: {}", e);
            }
        }
        result
    }

    async fn post_once(&self, envelope: &RelayEnvelope) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| HosterError::RelayUnreachable {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(HosterError::RelayUnreachable {
                url: self.url.clone(),
                message: format!("{}: {}", status, body),
            })
        } else {
            // The relay understood us and refused; retrying will not help
            Err(HosterError::InvalidRequest(format!(
                "Relay at {} rejected message with {}: {}",
                self.url, status, body
            )))
        }
    }
}

/// What happened to one inbound overlay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Forwarded,
    /// Handed to the relay worker; delivery happens in the background.
    Queued,
    /// Valid message for some other peer.
    NotAddressed,
    /// Undecodable payload.
    Discarded,
    /// Addressed here but the relay could not take it.
    RelayFailed,
}

/// Filters the broadcast stream down to messages addressed to `local_id`.
#[derive(Clone)]
pub struct InboundRouter {
    local_id: PeerIdentity,
    forwarder: RelayForwarder,
}

impl InboundRouter {
    pub fn new(local_id: PeerIdentity, forwarder: RelayForwarder) -> Self {
        Self {
            local_id,
            forwarder,
        }
    }

    pub fn local_id(&self) -> &PeerIdentity {
        &self.local_id
    }

    pub fn is_addressed_here(&self, message: &TunnelMessage) -> bool {
        message.to == self.local_id
    }

    /// Decode one overlay message and build its relay envelope if it is
    /// addressed here. Any other outcome is returned as the error.
    pub fn accept(&self, bytes: &[u8]) -> std::result::Result<RelayEnvelope, InboundOutcome> {
        metrics::GOSSIP_MESSAGES_RECEIVED.inc();

        let message: TunnelMessage = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(e) => {
                metrics::GOSSIP_DECODE_ERRORS.inc();
                let err = HosterError::TransportDecode(e.to_string());
                warn!(code = err.code(), len = bytes.len(), "Discarding overlay message: {}", err);
                return Err(InboundOutcome::Discarded);
            }
        };

        if !self.is_addressed_here(&message) {
            debug!(to = %message.to, message_type = %message.message_type, "Message not addressed to this node");
            return Err(InboundOutcome::NotAddressed);
        }

        let payload = serde_json::to_value(&message).map_err(|e| {
            warn!("Could not re-encode tunnel message: {}", e);
            InboundOutcome::Discarded
        })?;
        debug!(from = %message.from, message_type = %message.message_type, "Accepted message for relay");
        Ok(RelayEnvelope {
            to: message.to,
            payload,
        })
    }

    /// Accept and relay inline, waiting for the relay to answer.
    pub async fn handle_inbound(&self, bytes: &[u8]) -> InboundOutcome {
        let envelope = match self.accept(bytes) {
            Ok(envelope) => envelope,
            Err(outcome) => return outcome,
        };
        match self.forwarder.forward(&envelope).await {
            Ok(()) => InboundOutcome::Forwarded,
            Err(_) => InboundOutcome::RelayFailed,
        }
    }

    /// Start a worker that relays accepted envelopes one at a time, in the
    /// order they were submitted.
    pub fn into_relay_queue(self, capacity: usize) -> (RelayQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RelayEnvelope>(capacity.max(1));
        let forwarder = self.forwarder.clone();

        let worker = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                // forward() already logs and counts failures
                let _ = forwarder.forward(&envelope).await;
            }
            debug!("Relay queue closed");
        });

        (RelayQueue { router: self, tx }, worker)
    }
}

/// Receive-side handle: filtering happens inline, relaying on the worker.
pub struct RelayQueue {
    router: InboundRouter,
    tx: mpsc::Sender<RelayEnvelope>,
}

impl RelayQueue {
    /// Never waits on the relay. A full queue drops the message.
    pub fn submit(&self, bytes: &[u8]) -> InboundOutcome {
        let envelope = match self.router.accept(bytes) {
            Ok(envelope) => envelope,
            Err(outcome) => return outcome,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => InboundOutcome::Queued,
            Err(TrySendError::Full(envelope)) => {
                metrics::RELAY_FAILURES.inc();
                warn!(to = %envelope.to, "Relay queue full; dropping message");
                InboundOutcome::RelayFailed
            }
            Err(TrySendError::Closed(_)) => {
                metrics::RELAY_FAILURES.inc();
                error!("Relay worker stopped; dropping message");
                InboundOutcome::RelayFailed
            }
        }
    }
}
