//! Storage façade for one community replica.
//!
//! [`Storage::initialize`] opens the log store under `<root>/LogDb` and the
//! block store under `<root>/Blocks`, joins the community topic and every
//! persisted channel topic, then starts forwarding store changes to
//! [`EngineEvent`] subscribers. Every other operation needs an initialized
//! instance and fails with [`EngineError::NotInitialized`] otherwise.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use hearth_net::PubSub;
use hearth_shared::constants::{BLOCK_REPO_DIR, DOWNLOADS_DIR, REPLICATED_DB_DIR};
use hearth_shared::protocol::PeerMessage;
use hearth_shared::types::{ChannelAddress, Cid, CommunityId, Timestamp};
use hearth_shared::{
    ChannelMessage, DownloadPhase, DownloadStatus, FileContent, FileMetadata, Identity,
    MessageBody, MessageRef, MessageType, PublicChannel, SendingStatus,
};
use hearth_store::{
    AppendOutcome, BlockStore, Conversation, DirectMessage, DmUser, FsBlockStore, LogStore,
    StoreEvent,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StorageOptions;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::files::FileTransferManager;
use crate::sync::Reconciler;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// On-disk layout of one community replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub root: PathBuf,
    pub db_dir: PathBuf,
    pub blocks_dir: PathBuf,
    pub downloads_dir: PathBuf,
}

impl StoragePaths {
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            db_dir: root.join(REPLICATED_DB_DIR),
            blocks_dir: root.join(BLOCK_REPO_DIR),
            downloads_dir: root.join(DOWNLOADS_DIR),
            root,
        }
    }
}

struct Engine {
    store: Arc<LogStore>,
    files: Arc<FileTransferManager>,
    forwarder: JoinHandle<()>,
}

pub struct Storage {
    community_id: CommunityId,
    paths: StoragePaths,
    options: StorageOptions,
    transport: Arc<dyn PubSub>,
    block_store: Option<Arc<dyn BlockStore>>,
    engine: RwLock<Option<Arc<Engine>>>,
    init_lock: tokio::sync::Mutex<()>,
    channels: Mutex<HashSet<ChannelAddress>>,
    pub(crate) reconciler: Reconciler,
    events: broadcast::Sender<EngineEvent>,
}

impl Storage {
    pub fn new(
        root: impl Into<PathBuf>,
        transport: Arc<dyn PubSub>,
        community_id: CommunityId,
        options: StorageOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            community_id,
            paths: StoragePaths::under(root),
            options,
            transport,
            block_store: None,
            engine: RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(()),
            channels: Mutex::new(HashSet::new()),
            reconciler: Reconciler::default(),
            events,
        }
    }

    /// Use `blocks` instead of a filesystem block store under `<root>/Blocks`.
    pub fn with_block_store(mut self, blocks: Arc<dyn BlockStore>) -> Self {
        self.block_store = Some(blocks);
        self
    }

    pub fn community_id(&self) -> &CommunityId {
        &self.community_id
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn local_peer_id(&self) -> String {
        self.transport.local_peer_id()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn engine(&self) -> Option<Arc<Engine>> {
        self.engine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn channel_set(&self) -> MutexGuard<'_, HashSet<ChannelAddress>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine().is_some()
    }

    pub fn store(&self) -> Result<Arc<LogStore>> {
        self.engine()
            .map(|engine| Arc::clone(&engine.store))
            .ok_or(EngineError::NotInitialized)
    }

    pub fn files(&self) -> Result<Arc<FileTransferManager>> {
        self.engine()
            .map(|engine| Arc::clone(&engine.files))
            .ok_or(EngineError::NotInitialized)
    }

    /// Open the replica and join its topics. Calling it again on an
    /// initialized instance returns the same store.
    pub async fn initialize(&self) -> Result<Arc<LogStore>> {
        let _guard = self.init_lock.lock().await;
        if let Some(engine) = self.engine() {
            debug!(community = %self.community_id, "Storage already initialized");
            return Ok(Arc::clone(&engine.store));
        }

        if self.options.create_paths {
            for dir in [&self.paths.db_dir, &self.paths.blocks_dir] {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| unavailable(dir, e))?;
            }
        }

        let store = LogStore::open(&self.paths.db_dir, self.options.enforce_membership)
            .map_err(|e| unavailable(&self.paths.db_dir, e))?;
        let store = Arc::new(store);

        let blocks: Arc<dyn BlockStore> = match &self.block_store {
            Some(blocks) => Arc::clone(blocks),
            None => Arc::new(
                FsBlockStore::open(
                    self.paths.blocks_dir.clone(),
                    self.options.max_file_size,
                    self.options.create_paths,
                )
                .await
                .map_err(|e| unavailable(&self.paths.blocks_dir, e))?,
            ),
        };

        let files = Arc::new(FileTransferManager::new(
            self.community_id.clone(),
            Arc::clone(&store),
            blocks,
            Arc::clone(&self.transport),
            self.paths.downloads_dir.clone(),
            self.options.max_file_size,
            self.options.download_timeout,
            self.events.clone(),
        ));

        if let Err(e) = self.join_topics(&store).await {
            let _ = store.close();
            return Err(e);
        }

        let forwarder = spawn_forwarder(
            store.subscribe(),
            Arc::clone(&files),
            self.events.clone(),
            self.options.auto_download,
        );

        *self
            .engine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(Engine {
            store: Arc::clone(&store),
            files,
            forwarder,
        }));

        info!(
            community = %self.community_id,
            root = %self.paths.root.display(),
            channels = self.channel_set().len(),
            "Storage initialized"
        );
        Ok(store)
    }

    async fn join_topics(&self, store: &LogStore) -> Result<()> {
        self.transport
            .subscribe(&self.community_id.to_topic())
            .await?;
        for channel in store.channels().await {
            self.subscribe_to_channel(&channel.address).await?;
        }
        Ok(())
    }

    /// Stop background work, leave all topics and close the replica.
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        let engine = self
            .engine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(engine) = engine else {
            debug!(community = %self.community_id, "Storage already shut down");
            return Ok(());
        };

        engine.forwarder.abort();
        engine.files.cancel_all();
        self.reconciler.abandon_all();

        let mut topics: Vec<String> = self
            .channel_set()
            .drain()
            .map(|address| address.to_topic(&self.community_id))
            .collect();
        topics.push(self.community_id.to_topic());
        for topic in topics {
            if let Err(e) = self.transport.unsubscribe(&topic).await {
                debug!(topic = %topic, error = %e, "Unsubscribe failed during shutdown");
            }
        }

        engine.store.close()?;
        info!(community = %self.community_id, "Storage shut down");
        Ok(())
    }

    pub(crate) async fn publish(&self, topic: &str, envelope: &PeerMessage) -> Result<()> {
        self.transport.publish(topic, envelope.to_bytes()?).await?;
        Ok(())
    }

    // -- membership --

    pub fn set_root_ca(&self, pem: &str) -> Result<()> {
        self.store()?.set_root_ca(pem)?;
        Ok(())
    }

    /// Append a certificate issued or received locally and announce it when
    /// it is new.
    pub async fn admit_certificate(&self, pem: &str) -> Result<AppendOutcome> {
        let outcome = self.store()?.append_certificate(pem).await?;
        if outcome.is_accepted() {
            let envelope = PeerMessage::CertificateAdded {
                certificate: pem.trim().to_string(),
            };
            if let Err(e) = self.publish(&self.community_id.to_topic(), &envelope).await {
                warn!(error = %e, "Failed to announce certificate");
            }
        }
        Ok(outcome)
    }

    /// Returns `true` only when the certificate was new and valid.
    pub async fn save_certificate(&self, certificate: Option<&str>) -> bool {
        let Some(pem) = certificate.filter(|pem| !pem.trim().is_empty()) else {
            debug!("Empty certificate not saved");
            return false;
        };
        match self.admit_certificate(pem).await {
            Ok(AppendOutcome::Accepted) => true,
            Ok(AppendOutcome::Duplicate) => false,
            Ok(AppendOutcome::Rejected(reason)) => {
                info!(%reason, "Certificate not saved");
                false
            }
            Err(e) => {
                warn!(error = %e, "Certificate not saved");
                false
            }
        }
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        Ok(self.store()?.username_exists(username).await?)
    }

    pub async fn username_held_by_other(&self, username: &str, public_key_hex: &str) -> Result<bool> {
        Ok(self
            .store()?
            .username_held_by_other(username, public_key_hex)
            .await?)
    }

    pub async fn valid_certificates(&self) -> Result<Vec<String>> {
        Ok(self.store()?.valid_certificates().await?)
    }

    // -- channels --

    /// Join the pub/sub topic of a channel. Joining twice is a no-op.
    pub async fn subscribe_to_channel(&self, address: &ChannelAddress) -> Result<()> {
        if !self.channel_set().insert(address.clone()) {
            return Ok(());
        }
        let topic = address.to_topic(&self.community_id);
        if let Err(e) = self.transport.subscribe(&topic).await {
            self.channel_set().remove(address);
            return Err(e.into());
        }
        debug!(topic = %topic, "Subscribed to channel");
        Ok(())
    }

    pub fn is_subscribed(&self, address: &ChannelAddress) -> bool {
        self.channel_set().contains(address)
    }

    /// Record a channel, join its topic and announce it if it was new.
    pub async fn subscribe_to_topic(&self, channel: &PublicChannel) -> Result<AppendOutcome> {
        let store = self.store()?;
        let outcome = store.append_channel(channel).await?;
        if let AppendOutcome::Rejected(rejection) = outcome {
            return Err(rejection.into());
        }
        self.subscribe_to_channel(&channel.address).await?;

        if outcome.is_accepted() {
            let envelope = PeerMessage::ChannelAnnounced {
                channel: serde_json::to_value(channel)?,
            };
            self.publish(&self.community_id.to_topic(), &envelope).await?;
        }
        Ok(outcome)
    }

    pub async fn create_channel(
        &self,
        name: &str,
        description: &str,
        owner: &str,
    ) -> Result<PublicChannel> {
        let channel = PublicChannel::new(name, description, owner, Timestamp::now());
        self.subscribe_to_topic(&channel).await?;
        info!(name, address = %channel.address, "Channel created");
        Ok(channel)
    }

    /// Only the channel owner may change the description. The change stays
    /// on this replica.
    pub async fn update_channel_description(
        &self,
        address: &ChannelAddress,
        requester: &str,
        description: &str,
    ) -> Result<bool> {
        Ok(self
            .store()?
            .update_channel_description(address, requester, description)
            .await?)
    }

    pub async fn channels(&self) -> Result<Vec<PublicChannel>> {
        Ok(self.store()?.channels().await)
    }

    /// Publish the ids held for a channel so peers can ask for what they
    /// lack. Returns how many ids were advertised.
    pub async fn advertise_channel_messages(&self, address: &ChannelAddress) -> Result<usize> {
        let ids = self.store()?.message_ids(address).await;
        let count = ids.len();
        let envelope = PeerMessage::ChannelMessagesIds {
            ids,
            peer_id: self.local_peer_id(),
            channel_address: address.clone(),
            community_id: self.community_id.clone(),
        };
        self.publish(&self.community_id.to_topic(), &envelope).await?;
        debug!(channel = %address, count, "Advertised channel messages");
        Ok(count)
    }

    // -- messages --

    /// Append a message received outside the pub/sub path.
    pub async fn append_message(&self, message: &ChannelMessage) -> Result<AppendOutcome> {
        Ok(self.store()?.append_message(message).await?)
    }

    /// Sign, store and publish a message authored by `identity`.
    ///
    /// A message carrying media is typed as an image. The media path stays
    /// local: peers receive the content id and fetch the bytes themselves.
    pub async fn send_message(
        &self,
        identity: &Identity,
        channel_address: &ChannelAddress,
        body: MessageBody,
        media: Option<FileMetadata>,
    ) -> Result<ChannelMessage> {
        let store = self.store()?;
        let local_path = media.as_ref().and_then(|m| m.path.clone());
        let media = media.map(|mut m| {
            m.path = None;
            m.message = None;
            m
        });
        let message_type = if media.is_some() {
            MessageType::Image
        } else {
            MessageType::Basic
        };

        let mut message =
            ChannelMessage::new_signed(identity, channel_address.clone(), message_type, body, media);
        let reference = MessageRef {
            id: message.id.clone(),
            channel_address: channel_address.clone(),
        };
        if let Some(media) = message.media.as_mut() {
            media.message = Some(reference);
        }

        match store.append_local_message(&message).await? {
            AppendOutcome::Accepted => {}
            AppendOutcome::Duplicate => {
                return Err(EngineError::SchemaInvalid(format!(
                    "message {} already exists",
                    message.id
                )))
            }
            AppendOutcome::Rejected(rejection) => return Err(rejection.into()),
        }

        if let Some(media) = &message.media {
            self.files()?.broadcast_hosted_file(media).await?;
            if let Some(path) = local_path {
                let mut resolved = media.clone();
                resolved.path = Some(path);
                store.update_message_media(&resolved).await?;
            }
        }

        let envelope = PeerMessage::MessagePosted {
            message: serde_json::to_value(&message)?,
        };
        self.publish(&channel_address.to_topic(&self.community_id), &envelope)
            .await?;
        store
            .set_sending_status(&message.id, SendingStatus::Sent)
            .await?;

        debug!(id = %message.id, channel = %channel_address, "Message sent");
        Ok(message)
    }

    pub async fn message_sending_status(&self, id: &str) -> Result<Option<SendingStatus>> {
        Ok(self.store()?.sending_status(id).await?)
    }

    pub async fn messages(&self, address: &ChannelAddress) -> Result<Vec<ChannelMessage>> {
        Ok(self.store()?.messages(address).await)
    }

    /// Attach resolved media to the message it came with.
    pub async fn update_message_media(&self, media: &FileMetadata) -> Result<AppendOutcome> {
        Ok(self.store()?.update_message_media(media).await?)
    }

    // -- files --

    pub async fn upload_file(&self, content: FileContent) -> Result<FileMetadata> {
        self.files()?.upload_file(content).await
    }

    pub async fn broadcast_hosted_file(&self, metadata: &FileMetadata) -> Result<AppendOutcome> {
        self.files()?.broadcast_hosted_file(metadata).await
    }

    pub async fn download_file(&self, metadata: &FileMetadata) -> Result<DownloadPhase> {
        self.files()?.download_file(metadata).await
    }

    pub fn cancel_download(&self, cid: &Cid) -> Result<bool> {
        Ok(self.files()?.cancel_download(cid))
    }

    pub fn remove_download_status(&self, cid: &Cid) -> Result<Option<DownloadStatus>> {
        Ok(self.files()?.remove_download_status(cid))
    }

    pub fn download_status(&self, cid: &Cid) -> Result<Option<DownloadStatus>> {
        Ok(self.files()?.download_status(cid))
    }

    pub fn download_statuses(&self) -> Result<Vec<DownloadStatus>> {
        Ok(self.files()?.download_statuses())
    }

    /// Retry downloads of known files that never completed.
    pub async fn check_for_missing_files(&self) -> Result<usize> {
        Ok(self
            .files()?
            .check_for_missing_files(self.options.max_download_attempts)
            .await)
    }

    pub async fn hosted_files(&self) -> Result<Vec<FileMetadata>> {
        Ok(self.store()?.files().await)
    }

    // -- direct messages --

    pub async fn announce_dm_user(&self, user: DmUser) -> Result<AppendOutcome> {
        let outcome = self.store()?.append_dm_user(user.clone()).await?;
        if let AppendOutcome::Rejected(rejection) = outcome {
            return Err(rejection.into());
        }
        if outcome.is_accepted() {
            let envelope = PeerMessage::DmUserAnnounced {
                public_key: user.public_key,
                half_key: user.half_key,
            };
            self.publish(&self.community_id.to_topic(), &envelope).await?;
        }
        Ok(outcome)
    }

    pub async fn announce_conversation(&self, conversation: Conversation) -> Result<AppendOutcome> {
        let outcome = self
            .store()?
            .append_conversation(conversation.clone())
            .await?;
        if let AppendOutcome::Rejected(rejection) = outcome {
            return Err(rejection.into());
        }
        if outcome.is_accepted() {
            let envelope = PeerMessage::ConversationAnnounced {
                public_key: conversation.public_key,
                encrypted_phrase: conversation.encrypted_phrase,
            };
            self.publish(&self.community_id.to_topic(), &envelope).await?;
        }
        Ok(outcome)
    }

    pub async fn send_direct_message(&self, message: DirectMessage) -> Result<AppendOutcome> {
        let outcome = self
            .store()?
            .append_direct_message(message.clone())
            .await?;
        if let AppendOutcome::Rejected(rejection) = outcome {
            return Err(rejection.into());
        }
        if outcome.is_accepted() {
            let envelope = PeerMessage::DirectMessagePosted {
                conversation: message.conversation,
                payload: message.payload,
            };
            self.publish(&self.community_id.to_topic(), &envelope).await?;
        }
        Ok(outcome)
    }

    pub async fn dm_users(&self) -> Result<Vec<DmUser>> {
        Ok(self.store()?.dm_users().await)
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.store()?.conversations().await)
    }

    pub async fn direct_messages(&self, conversation: &str) -> Result<Vec<DirectMessage>> {
        Ok(self.store()?.direct_messages(conversation).await)
    }
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> EngineError {
    EngineError::StorageUnavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Media a store change asks us to fetch, if any.
fn wanted_media(event: &StoreEvent) -> Option<FileMetadata> {
    match event {
        StoreEvent::MessageAppended(message) => message.media.as_ref().map(|media| {
            let mut media = media.clone();
            media.message = Some(MessageRef {
                id: message.id.clone(),
                channel_address: message.channel_address.clone(),
            });
            media
        }),
        StoreEvent::FileHosted(metadata) => Some(metadata.clone()),
        _ => None,
    }
}

fn spawn_forwarder(
    mut changes: broadcast::Receiver<StoreEvent>,
    files: Arc<FileTransferManager>,
    events: broadcast::Sender<EngineEvent>,
    auto_download: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if auto_download {
                        if let Some(media) = wanted_media(&change) {
                            files.spawn_download(media);
                        }
                    }
                    let _ = events.send(EngineEvent::Store(change));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Store change forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
