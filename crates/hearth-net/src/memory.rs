//! In-process pub/sub hub.
//!
//! Every joined peer gets a [`MemoryPubSub`] handle and an event receiver.
//! Publishing delivers to the other subscribers of the topic, never back to
//! the publisher, matching gossipsub.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::pubsub::{NetworkEvent, PubSub};

const INBOX_CAPACITY: usize = 1024;

#[derive(Default)]
struct HubState {
    inboxes: HashMap<String, mpsc::Sender<NetworkEvent>>,
    topics: HashMap<String, HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub as `peer_id`. Joining again replaces the previous inbox.
    pub fn join(&self, peer_id: impl Into<String>) -> (MemoryPubSub, mpsc::Receiver<NetworkEvent>) {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut state = lock(&self.state);
        for (other, inbox) in &state.inboxes {
            if *other != peer_id {
                let _ = inbox.try_send(NetworkEvent::PeerConnected(peer_id.clone()));
            }
        }
        state.inboxes.insert(peer_id.clone(), tx);
        debug!(peer = %peer_id, "Joined memory hub");

        (
            MemoryPubSub {
                hub: self.clone(),
                peer_id,
            },
            rx,
        )
    }

    /// Drop a peer and its subscriptions.
    pub fn leave(&self, peer_id: &str) {
        let mut state = lock(&self.state);
        state.inboxes.remove(peer_id);
        for subscribers in state.topics.values_mut() {
            subscribers.remove(peer_id);
        }
        for inbox in state.inboxes.values() {
            let _ = inbox.try_send(NetworkEvent::PeerDisconnected(peer_id.to_string()));
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        let state = lock(&self.state);
        let mut peers: Vec<String> = state
            .topics
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct MemoryPubSub {
    hub: MemoryHub,
    peer_id: String,
}

#[async_trait]
impl PubSub for MemoryPubSub {
    fn local_peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), NetError> {
        let mut state = lock(&self.hub.state);
        if !state.inboxes.contains_key(&self.peer_id) {
            return Err(NetError::NotJoined(self.peer_id.clone()));
        }
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(self.peer_id.clone());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        let mut state = lock(&self.hub.state);
        if let Some(subscribers) = state.topics.get_mut(topic) {
            subscribers.remove(&self.peer_id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError> {
        let targets: Vec<mpsc::Sender<NetworkEvent>> = {
            let state = lock(&self.hub.state);
            if !state.inboxes.contains_key(&self.peer_id) {
                return Err(NetError::NotJoined(self.peer_id.clone()));
            }
            state
                .topics
                .get(topic)
                .into_iter()
                .flatten()
                .filter(|peer| **peer != self.peer_id)
                .filter_map(|peer| state.inboxes.get(peer).cloned())
                .collect()
        };

        for inbox in targets {
            let event = NetworkEvent::Message {
                source: Some(self.peer_id.clone()),
                topic: topic.to_string(),
                data: data.clone(),
            };
            if inbox.send(event).await.is_err() {
                warn!(topic = %topic, "Dropping message for a closed inbox");
            }
        }
        Ok(())
    }

    async fn peers(&self, topic: &str) -> Result<Vec<String>, NetError> {
        Ok(self
            .hub
            .subscribers(topic)
            .into_iter()
            .filter(|p| *p != self.peer_id)
            .collect())
    }
}
