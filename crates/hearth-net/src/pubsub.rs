//! Publish/subscribe capability consumed by the storage engine.
//!
//! The engine never talks to libp2p directly. It holds an
//! `Arc<dyn PubSub>` and reads [`NetworkEvent`]s from a channel, so the
//! swarm can be swapped for [`crate::MemoryHub`] in tests.

use async_trait::async_trait;
use libp2p::identity::Keypair;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::NetError;
use crate::swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};

/// Inbound transport traffic, with peers identified by their string id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Message {
        source: Option<String>,
        topic: String,
        data: Vec<u8>,
    },
    PeerConnected(String),
    PeerDisconnected(String),
}

#[async_trait]
pub trait PubSub: Send + Sync {
    fn local_peer_id(&self) -> String;

    /// Subscribing to a topic already joined is a no-op.
    async fn subscribe(&self, topic: &str) -> Result<(), NetError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError>;

    /// Deliver `data` to every other subscriber of `topic`.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError>;

    /// Peers currently known to subscribe to `topic`.
    async fn peers(&self, topic: &str) -> Result<Vec<String>, NetError>;
}

/// [`PubSub`] over a running libp2p swarm.
#[derive(Debug, Clone)]
pub struct SwarmPubSub {
    cmd_tx: mpsc::Sender<SwarmCommand>,
    local_peer_id: String,
}

impl SwarmPubSub {
    pub fn new(cmd_tx: mpsc::Sender<SwarmCommand>, local_peer_id: String) -> Self {
        Self {
            cmd_tx,
            local_peer_id,
        }
    }

    /// Spawn a swarm and forward its notifications as [`NetworkEvent`]s.
    pub async fn spawn(
        keypair: Keypair,
        config: SwarmConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<NetworkEvent>)> {
        let (cmd_tx, mut notif_rx, peer_id) = spawn_swarm(keypair, config).await?;
        let (event_tx, event_rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(notification) = notif_rx.recv().await {
                let event = match notification {
                    SwarmNotification::MessageReceived {
                        source,
                        topic,
                        data,
                    } => NetworkEvent::Message {
                        source: source.map(|p| p.to_string()),
                        topic,
                        data,
                    },
                    SwarmNotification::PeerConnected { peer_id, .. } => {
                        NetworkEvent::PeerConnected(peer_id.to_string())
                    }
                    SwarmNotification::PeerDisconnected { peer_id } => {
                        NetworkEvent::PeerDisconnected(peer_id.to_string())
                    }
                };
                if event_tx.send(event).await.is_err() {
                    debug!("Network event receiver dropped");
                    break;
                }
            }
        });

        Ok((Self::new(cmd_tx, peer_id.to_string()), event_rx))
    }

    async fn send(&self, cmd: SwarmCommand) -> Result<(), NetError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| NetError::ChannelClosed)
    }

    pub async fn dial(&self, addr: libp2p::Multiaddr) -> Result<(), NetError> {
        self.send(SwarmCommand::Dial(addr)).await
    }

    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.send(SwarmCommand::Shutdown).await
    }
}

#[async_trait]
impl PubSub for SwarmPubSub {
    fn local_peer_id(&self) -> String {
        self.local_peer_id.clone()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), NetError> {
        debug!(topic = %topic, "Subscribing to topic");
        self.send(SwarmCommand::SubscribeTopic(topic.to_string()))
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        self.send(SwarmCommand::UnsubscribeTopic(topic.to_string()))
            .await
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError> {
        self.send(SwarmCommand::PublishMessage {
            topic: topic.to_string(),
            data,
        })
        .await
    }

    async fn peers(&self, topic: &str) -> Result<Vec<String>, NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::GetPeers {
            topic: Some(topic.to_string()),
            reply,
        })
        .await?;
        let peers = rx.await.map_err(|_| NetError::ChannelClosed)?;
        Ok(peers.into_iter().map(|p| p.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_reach_the_swarm_channel() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let pubsub = SwarmPubSub::new(cmd_tx, "local".into());

        pubsub.subscribe("community:c").await.unwrap();
        pubsub.publish("community:c", b"hi".to_vec()).await.unwrap();

        match cmd_rx.recv().await {
            Some(SwarmCommand::SubscribeTopic(t)) => assert_eq!(t, "community:c"),
            other => panic!("unexpected command: {other:?}"),
        }
        match cmd_rx.recv().await {
            Some(SwarmCommand::PublishMessage { topic, data }) => {
                assert_eq!(topic, "community:c");
                assert_eq!(data, b"hi");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_swarm_reports_error() {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        drop(cmd_rx);
        let pubsub = SwarmPubSub::new(cmd_tx, "local".into());
        assert_eq!(
            pubsub.subscribe("t").await,
            Err(NetError::ChannelClosed)
        );
        assert_eq!(pubsub.peers("t").await, Err(NetError::ChannelClosed));
    }
}
