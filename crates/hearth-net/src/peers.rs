//! Connected peers and the topics they subscribe to.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub address: Multiaddr,
    pub connected_at: DateTime<Utc>,
    /// GossipSub topics the peer announced.
    pub topics: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        debug!(peer = %peer_id, addr = %address, "Tracking new peer connection");
        self.peers
            .entry(peer_id)
            .and_modify(|info| info.address = address.clone())
            .or_insert_with(|| ConnectionInfo {
                peer_id,
                address,
                connected_at: Utc::now(),
                topics: HashSet::new(),
            });
    }

    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    pub fn on_subscribed(&mut self, peer_id: &PeerId, topic: &str) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.topics.insert(topic.to_string());
        }
    }

    pub fn on_unsubscribed(&mut self, peer_id: &PeerId, topic: &str) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.topics.remove(topic);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionInfo> {
        self.peers.get(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Peers known to subscribe to `topic`.
    pub fn peers_on(&self, topic: &str) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|info| info.topics.contains(topic))
            .map(|info| info.peer_id)
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }
}
