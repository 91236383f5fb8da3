//! A node hosting one or more community replicas over a shared transport.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};

use hearth_net::pubsub::NetworkEvent;
use hearth_net::PubSub;
use hearth_shared::types::CommunityId;
use hearth_shared::Community;
use hearth_store::BlockStore;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::community_of_topic;
use crate::config::{NodeConfig, StorageOptions};
use crate::error::{EngineError, Result};
use crate::storage::Storage;

pub struct Node {
    data_dir: PathBuf,
    options: StorageOptions,
    transport: Arc<dyn PubSub>,
    block_store: Option<Arc<dyn BlockStore>>,
    communities: RwLock<HashMap<CommunityId, Arc<Storage>>>,
    /// Known peer addresses per launched community.
    peer_lists: RwLock<HashMap<CommunityId, Vec<String>>>,
    current: StdRwLock<Option<CommunityId>>,
}

impl Node {
    pub fn new(data_dir: impl Into<PathBuf>, options: StorageOptions, transport: Arc<dyn PubSub>) -> Self {
        Self {
            data_dir: data_dir.into(),
            options,
            transport,
            block_store: None,
            communities: RwLock::new(HashMap::new()),
            peer_lists: RwLock::new(HashMap::new()),
            current: StdRwLock::new(None),
        }
    }

    pub fn from_config(config: &NodeConfig, transport: Arc<dyn PubSub>) -> Self {
        Self::new(config.data_dir.clone(), config.storage_options(), transport)
    }

    /// Share `blocks` between all communities instead of one filesystem
    /// block store each.
    pub fn with_block_store(mut self, blocks: Arc<dyn BlockStore>) -> Self {
        self.block_store = Some(blocks);
        self
    }

    pub fn local_peer_id(&self) -> String {
        self.transport.local_peer_id()
    }

    /// Open the community's replica under `<data_dir>/<community id>`.
    /// Launching an already running community returns its storage.
    pub async fn launch_community(&self, community: &Community) -> Result<Arc<Storage>> {
        let mut communities = self.communities.write().await;
        if let Some(storage) = communities.get(&community.id) {
            debug!(community = %community.id, "Community already launched");
            return Ok(Arc::clone(storage));
        }

        let root = self.community_root(&community.id)?;
        let mut storage = Storage::new(
            root,
            Arc::clone(&self.transport),
            community.id.clone(),
            self.options.clone(),
        );
        if let Some(blocks) = &self.block_store {
            storage = storage.with_block_store(Arc::clone(blocks));
        }
        let storage = Arc::new(storage);
        storage.initialize().await?;

        if !community.root_ca.trim().is_empty() {
            if let Err(e) = storage.set_root_ca(&community.root_ca) {
                let _ = storage.shutdown().await;
                return Err(e);
            }
        }

        communities.insert(community.id.clone(), Arc::clone(&storage));
        self.peer_lists
            .write()
            .await
            .insert(community.id.clone(), community.peer_list.clone());
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.is_none() {
            *current = Some(community.id.clone());
        }
        info!(community = %community.id, name = %community.name, "Community launched");
        Ok(storage)
    }

    fn community_root(&self, id: &CommunityId) -> Result<PathBuf> {
        let mut components = Path::new(id.as_str()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.data_dir.join(id.as_str())),
            _ => Err(EngineError::SchemaInvalid(format!(
                "community id {id:?} is not a plain directory name"
            ))),
        }
    }

    /// Shut the community's replica down. Returns `false` when it was not
    /// running.
    pub async fn leave_community(&self, id: &CommunityId) -> Result<bool> {
        let storage = self.communities.write().await.remove(id);
        let Some(storage) = storage else {
            return Ok(false);
        };
        self.peer_lists.write().await.remove(id);
        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.as_ref() == Some(id) {
                *current = None;
            }
        }
        storage.shutdown().await?;
        info!(community = %id, "Community left");
        Ok(true)
    }

    pub async fn known_peers(&self, id: &CommunityId) -> Vec<String> {
        self.peer_lists
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remember newly learned peer addresses. Returns how many were new.
    pub async fn add_peers(&self, id: &CommunityId, peers: &[String]) -> Result<usize> {
        let mut lists = self.peer_lists.write().await;
        let known = lists
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownCommunity(id.clone()))?;
        let mut added = 0;
        for peer in peers {
            if !peer.trim().is_empty() && !known.contains(peer) {
                known.push(peer.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    pub async fn community(&self, id: &CommunityId) -> Option<Arc<Storage>> {
        self.communities.read().await.get(id).cloned()
    }

    pub async fn communities(&self) -> Vec<CommunityId> {
        let mut ids: Vec<CommunityId> = self.communities.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn current_community(&self) -> Option<CommunityId> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn set_current_community(&self, id: &CommunityId) -> Result<()> {
        if !self.communities.read().await.contains_key(id) {
            return Err(EngineError::UnknownCommunity(id.clone()));
        }
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id.clone());
        Ok(())
    }

    /// Hand one transport event to the community it belongs to.
    pub async fn route(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Message {
                source,
                topic,
                data,
            } => {
                let Some(id) = community_of_topic(&topic) else {
                    debug!(topic = %topic, "Message on foreign topic ignored");
                    return;
                };
                let Some(storage) = self.community(&id).await else {
                    debug!(topic = %topic, "Message for community not launched here");
                    return;
                };
                storage
                    .handle_network_message(source.as_deref(), &topic, &data)
                    .await;
            }
            NetworkEvent::PeerConnected(peer) => {
                debug!(peer = %peer, "Peer connected, advertising channel messages");
                self.advertise_all().await;
            }
            NetworkEvent::PeerDisconnected(peer) => {
                debug!(peer = %peer, "Peer disconnected");
            }
        }
    }

    /// Advertise every channel of every community so connecting peers can
    /// catch up.
    async fn advertise_all(&self) {
        let storages: Vec<Arc<Storage>> = self.communities.read().await.values().cloned().collect();
        for storage in storages {
            let channels = match storage.channels().await {
                Ok(channels) => channels,
                Err(e) => {
                    debug!(community = %storage.community_id(), error = %e, "Skipping advertisement");
                    continue;
                }
            };
            for channel in channels {
                if let Err(e) = storage.advertise_channel_messages(&channel.address).await {
                    warn!(channel = %channel.address, error = %e, "Failed to advertise channel");
                }
            }
        }
    }

    /// Route transport events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<NetworkEvent>) {
        while let Some(event) = events.recv().await {
            self.route(event).await;
        }
        debug!("Network event stream ended");
    }

    pub fn spawn(self: &Arc<Self>, events: mpsc::Receiver<NetworkEvent>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.run(events).await })
    }

    pub async fn check_for_missing_files(&self, id: &CommunityId) -> Result<usize> {
        let storage = self
            .community(id)
            .await
            .ok_or_else(|| EngineError::UnknownCommunity(id.clone()))?;
        storage.check_for_missing_files().await
    }

    /// Shut down every launched community.
    pub async fn shutdown(&self) -> Result<()> {
        let storages: Vec<(CommunityId, Arc<Storage>)> =
            self.communities.write().await.drain().collect();
        self.peer_lists.write().await.clear();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        for (id, storage) in storages {
            if let Err(e) = storage.shutdown().await {
                warn!(community = %id, error = %e, "Community did not shut down cleanly");
            }
        }
        info!("Node shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_net::memory::MemoryHub;

    #[tokio::test]
    async fn test_community_root_rejects_paths() {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.join("peer-a");
        let node = Node::new("/data", StorageOptions::default(), Arc::new(transport));

        assert_eq!(
            node.community_root(&CommunityId::new("c1")).unwrap(),
            PathBuf::from("/data/c1")
        );
        for bad in ["", "..", "a/b", "/abs", "."] {
            assert!(node.community_root(&CommunityId::new(bad)).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_launch_remembers_peers_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let hub = MemoryHub::new();
        let (transport, _events) = hub.join("peer-a");
        let node = Node::new(dir.path(), StorageOptions::default(), Arc::new(transport));

        let mut first = Community::new(CommunityId::new("first"), "First");
        first.peer_list = vec!["/ip4/10.0.0.1/udp/4101/quic-v1".into()];
        let second = Community::new(CommunityId::new("second"), "Second");

        let storage = node.launch_community(&first).await.unwrap();
        let again = node.launch_community(&first).await.unwrap();
        assert!(Arc::ptr_eq(&storage, &again));
        node.launch_community(&second).await.unwrap();

        assert_eq!(node.current_community(), Some(first.id.clone()));
        assert_eq!(node.communities().await, vec![first.id.clone(), second.id.clone()]);
        assert!(dir.path().join("first").join("LogDb").is_dir());

        let added = node
            .add_peers(
                &first.id,
                &["/ip4/10.0.0.2/udp/4101/quic-v1".into(), first.peer_list[0].clone()],
            )
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(node.known_peers(&first.id).await.len(), 2);

        assert!(node.leave_community(&first.id).await.unwrap());
        assert!(node.current_community().is_none());
        assert!(!storage.is_initialized());
        node.set_current_community(&second.id).await.unwrap();
        assert_eq!(node.current_community(), Some(second.id.clone()));

        node.shutdown().await.unwrap();
        assert!(node.communities().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_community_errors() {
        let hub = MemoryHub::new();
        let (transport, _events) = hub.join("peer-a");
        let node = Node::new("/data", StorageOptions::default(), Arc::new(transport));
        let id = CommunityId::new("nope");

        assert!(matches!(
            node.check_for_missing_files(&id).await,
            Err(EngineError::UnknownCommunity(_))
        ));
        assert!(node.set_current_community(&id).await.is_err());
        assert!(!node.leave_community(&id).await.unwrap());
        assert!(node.current_community().is_none());
    }
}
