// Iroh-based overlay transport
// One QUIC endpoint, one gossip topic, broadcast-then-filter addressing

use crate::bridge::MessagePublisher;
use crate::config::{NodeRole, P2pConfig};
use crate::error::{HosterError, Result as HosterResult};
use crate::identity::{KeyProvider, PeerIdentity};
use crate::metrics;
use crate::protocol::TunnelMessage;
use crate::relay::{InboundOutcome, InboundRouter, RELAY_QUEUE_CAPACITY};
use anyhow::Result;
use async_trait::async_trait;
use iroh::{protocol::Router, Endpoint, EndpointId};
use iroh_gossip::{
    api::{Event as GossipEvent, GossipReceiver, GossipSender},
    net::Gossip,
    proto::TopicId,
    ALPN as GOSSIP_ALPN,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

/// The single topic every hoster and gateway joins (exactly 32 bytes).
pub const TUNNEL_TOPIC: [u8; 32] = *b"sight-ai-hoster-tunnel-v1-iroh!!";

/// Parse bootstrap peers from config strings
///
/// Accepts formats:
/// - Full address: "EndpointId@ip:port" (extracts just the EndpointId)
/// - EndpointId only
pub fn parse_bootstrap_peers(peer_strings: &[String]) -> Vec<EndpointId> {
    let mut endpoint_ids = Vec::new();

    for peer_str in peer_strings {
        let peer_str = peer_str.trim();
        if peer_str.is_empty() {
            continue;
        }

        let id_str = match peer_str.find('@') {
            Some(idx) => &peer_str[..idx],
            None => peer_str,
        };

        match id_str.parse::<EndpointId>() {
            Ok(id) => {
                tracing::info!("Parsed bootstrap peer: {}", id);
                endpoint_ids.push(id);
            }
            Err(e) => {
                tracing::warn!("Failed to parse bootstrap peer '{}': {}", peer_str, e);
            }
        }
    }

    if endpoint_ids.is_empty() {
        tracing::info!("No bootstrap peers configured - joining the topic dial-only");
    } else {
        tracing::info!("Configured {} bootstrap peer(s)", endpoint_ids.len());
    }

    endpoint_ids
}

/// Overlay node: owns the endpoint, the gossip router and the topic handles.
pub struct TransportNode {
    endpoint: Endpoint,
    router: Router,
    endpoint_id: EndpointId,
    local_id: PeerIdentity,
    sender: Arc<Mutex<GossipSender>>,
    receiver: Mutex<Option<GossipReceiver>>,
    neighbors: Arc<dashmap::DashMap<EndpointId, chrono::DateTime<chrono::Utc>>>,
}

impl TransportNode {
    /// Bind the endpoint, spawn the gossip router and join the tunnel topic.
    pub async fn start(keys: &dyn KeyProvider, config: &P2pConfig) -> Result<Self> {
        let signing_key = keys.signing_key()?;
        let local_id = match config.role {
            NodeRole::Gateway => PeerIdentity::gateway(),
            NodeRole::Hoster => PeerIdentity::from_verifying_key(&signing_key.verifying_key()),
        };

        // The overlay endpoint shares the node's long-term key
        let secret_key = iroh::SecretKey::try_from(&signing_key.to_bytes()[..])?;

        let bind_addr = std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, config.listen_port);
        let endpoint = Endpoint::builder(iroh::endpoint::presets::N0)
            .secret_key(secret_key)
            .relay_mode(iroh::RelayMode::Custom(iroh::RelayMap::empty()))
            .bind_addr(bind_addr)?
            .bind()
            .await?;

        for addr in endpoint.bound_sockets() {
            tracing::info!("Iroh QUIC endpoint listening on: {}", addr);
        }
        let endpoint_id = endpoint.id();
        tracing::info!(endpoint_id = %endpoint_id, identity = %local_id, "Transport identity");

        let gossip = Gossip::builder().spawn(endpoint.clone());
        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .spawn();
        tracing::info!("Iroh router spawned with gossip protocol");

        let bootstrap_peers = parse_bootstrap_peers(&config.bootstrap_peers);
        let topic = gossip
            .subscribe(TopicId::from_bytes(TUNNEL_TOPIC), bootstrap_peers)
            .await?;
        let (sender, receiver) = topic.split();
        tracing::info!("Subscribed to tunnel topic");

        Ok(Self {
            endpoint,
            router,
            endpoint_id,
            local_id,
            sender: Arc::new(Mutex::new(sender)),
            receiver: Mutex::new(Some(receiver)),
            neighbors: Arc::new(dashmap::DashMap::new()),
        })
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint_id
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Receive loop: decode, filter on `to`, relay. Returns when the topic
    /// stream ends. Can only be run once per node.
    pub async fn run(&self, inbound: InboundRouter) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("transport receive loop already running"))?;

        tracing::info!("Starting tunnel receive loop for {}", self.local_id);

        // The worker relays in submission order, so per-task stream order
        // holds without the topic waiting on the relay
        let (relay, worker) = inbound.into_relay_queue(RELAY_QUEUE_CAPACITY);

        while let Some(event) = receiver.next().await {
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!("Error reading tunnel topic: {}", e);
                    continue;
                }
            };

            match event {
                GossipEvent::Received(msg) => {
                    tracing::trace!(from = %msg.delivered_from, len = msg.content.len(), "Tunnel message received");
                    if relay.submit(&msg.content) == InboundOutcome::RelayFailed {
                        tracing::warn!(from = %msg.delivered_from, "Inbound message not relayed");
                    }
                }
                GossipEvent::NeighborUp(peer) => {
                    tracing::info!(%peer, "Gossip neighbor connected");
                    self.neighbors.insert(peer, chrono::Utc::now());
                    metrics::NETWORK_PEERS.set(self.neighbors.len() as i64);
                }
                GossipEvent::NeighborDown(peer) => {
                    tracing::info!(%peer, "Gossip neighbor disconnected");
                    self.neighbors.remove(&peer);
                    metrics::NETWORK_PEERS.set(self.neighbors.len() as i64);
                }
                GossipEvent::Lagged => {
                    tracing::warn!("Tunnel topic lagged - missed messages");
                }
            }
        }

        tracing::warn!("Tunnel topic stream ended");
        drop(relay);
        if let Err(e) = worker.await {
            tracing::error!("Relay worker failed: {}", e);
        }
        Ok(())
    }

    /// Close the router and endpoint. In-flight dispatches keep running.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down transport");
        if let Err(e) = self.router.shutdown().await {
            tracing::warn!("Router shutdown error: {}", e);
        }
        self.endpoint.close().await;
    }
}

#[async_trait]
impl MessagePublisher for TransportNode {
    fn local_id(&self) -> &PeerIdentity {
        &self.local_id
    }

    async fn publish(&self, message: &TunnelMessage) -> HosterResult<()> {
        let bytes = serde_json::to_vec(message)
            .map_err(|e| HosterError::Internal(format!("Failed to encode tunnel message: {}", e)))?;
        let mut sender = self.sender.lock().await;
        sender
            .broadcast(bytes.into())
            .await
            .map_err(|e| HosterError::Network(format!("Gossip broadcast failed: {}", e)))?;
        tracing::debug!(to = %message.to, message_type = %message.message_type, "Published tunnel message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn endpoint_id_for(secret: [u8; 32]) -> EndpointId {
        let key = SigningKey::from_bytes(&secret);
        let public = iroh::PublicKey::from_bytes(&key.verifying_key().to_bytes()).unwrap();
        EndpointId::from(public)
    }

    #[test]
    fn test_topic_is_32_bytes() {
        assert_eq!(TUNNEL_TOPIC.len(), 32);
    }

    #[test]
    fn test_parse_bootstrap_peers() {
        let a = endpoint_id_for([1u8; 32]);
        let b = endpoint_id_for([2u8; 32]);
        let peers = parse_bootstrap_peers(&[
            a.to_string(),
            format!("{}@10.0.0.2:31001", b),
            "".to_string(),
            "not-a-peer".to_string(),
        ]);
        assert_eq!(peers, vec![a, b]);
    }
}
