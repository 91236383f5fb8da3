//! Swarm event loop driven through command and notification channels.
//!
//! The swarm runs in its own tokio task. Callers only ever hold the
//! command sender and the notification receiver; [`crate::SwarmPubSub`]
//! wraps both behind the [`crate::PubSub`] capability.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{gossipsub, identify, kad, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use hearth_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::HearthEvent;
use crate::discovery::{extract_peer_id, load_bootstrap_peers};
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

const CHANNEL_CAPACITY: usize = 256;

/// Commands sent into the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    PublishMessage {
        topic: String,
        data: Vec<u8>,
    },
    SubscribeTopic(String),
    UnsubscribeTopic(String),
    /// Snapshot of connected peers, optionally restricted to a topic.
    GetPeers {
        topic: Option<String>,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Shutdown,
}

/// Notifications sent from the swarm task.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub bootstrap_peers_path: Option<PathBuf>,
    /// Used for both the QUIC (udp) and TCP listeners. `0` picks a free port.
    pub listen_port: u16,
    /// Dialed on startup, e.g. a community's known peer list.
    pub extra_dials: Vec<Multiaddr>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers_path: None,
            listen_port: DEFAULT_QUIC_PORT,
            extra_dials: Vec::new(),
        }
    }
}

/// Spawn the libp2p swarm in a background task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let port = config.listen_port;
    let listen_addrs: [Multiaddr; 3] = [
        format!("/ip4/0.0.0.0/udp/{port}/quic-v1").parse()?,
        format!("/ip6/::/udp/{port}/quic-v1").parse()?,
        format!("/ip4/0.0.0.0/tcp/{port}").parse()?,
    ];
    for addr in listen_addrs {
        if let Err(e) = swarm.listen_on(addr.clone()) {
            // IPv6 is commonly unavailable in containers.
            warn!(addr = %addr, error = %e, "Failed to listen");
        }
    }

    info!(peer_id = %local_peer_id, port, "Swarm listening");

    let mut dials = config.extra_dials.clone();
    if let Some(ref path) = config.bootstrap_peers_path {
        dials.extend(load_bootstrap_peers(path));
    }

    let mut kad_seeded = false;
    for addr in &dials {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial startup peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
            kad_seeded = true;
        }
        debug!(addr = %addr, "Dialing startup peer");
    }

    if kad_seeded {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::PublishMessage { topic, data }) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            match swarm.behaviour_mut().gossipsub.publish(ident, data) {
                                Ok(_) => {}
                                // Nobody to gossip to yet; reconciliation covers the gap.
                                Err(gossipsub::PublishError::InsufficientPeers) => {
                                    debug!(topic = %topic, "Publish skipped, no peers on topic");
                                }
                                Err(e) => error!(topic = %topic, error = %e, "Publish failed"),
                            }
                        }
                        Some(SwarmCommand::SubscribeTopic(topic)) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                                error!(topic = %topic, error = %e, "Subscribe failed");
                            }
                        }
                        Some(SwarmCommand::UnsubscribeTopic(topic)) => {
                            let ident = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.unsubscribe(&ident) {
                                error!(topic = %topic, error = %e, "Unsubscribe failed");
                            }
                        }
                        Some(SwarmCommand::GetPeers { topic, reply }) => {
                            let peers = match topic {
                                Some(t) => peer_tracker.peers_on(&t),
                                None => peer_tracker.connected_peers(),
                            };
                            let _ = reply.send(peers);
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(HearthEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(HearthEvent::Gossipsub(
                            gossipsub::Event::Subscribed { peer_id, topic },
                        )) => {
                            debug!(peer = %peer_id, topic = %topic, "Peer subscribed");
                            peer_tracker.on_subscribed(&peer_id, topic.as_str());
                        }

                        SwarmEvent::Behaviour(HearthEvent::Gossipsub(
                            gossipsub::Event::Unsubscribed { peer_id, topic },
                        )) => {
                            peer_tracker.on_unsubscribed(&peer_id, topic.as_str());
                        }

                        SwarmEvent::Behaviour(HearthEvent::Kademlia(
                            kad::Event::OutboundQueryProgressed { result, .. },
                        )) => {
                            debug!(result = ?result, "Kademlia query progressed");
                        }

                        SwarmEvent::Behaviour(HearthEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            for addr in &info.listen_addrs {
                                swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr.clone());
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected {
                                    peer_id,
                                    address: addr,
                                })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
