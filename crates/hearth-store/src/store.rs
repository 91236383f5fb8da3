//! The replicated log store of one community.
//!
//! Each collection has its own async mutex, so writes to one collection are
//! serialized without blocking the others. The SQLite handle sits behind a
//! short-lived std mutex and is only touched while a collection lock is
//! held. Lock order is certificates, then any other collection.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use hearth_shared::certificate::Certificate;
use hearth_shared::constants::DB_FILE_NAME;
use hearth_shared::error::SchemaError;
use hearth_shared::types::{ChannelAddress, Cid};
use hearth_shared::validation::{
    validate_channel, validate_conversation_key, validate_direct_message, validate_message,
    validate_user, verify_message_signature,
};
use hearth_shared::{ChannelMessage, FileMetadata, PublicChannel, SendingStatus};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::log::{GrowOnlyLog, LogEntry};
use crate::membership::{CertificateLog, MembershipRegistry};
use crate::models::{
    AppendOutcome, Conversation, DirectMessage, DmUser, Rejection, StoreEvent,
};

const ROOT_CA_KEY: &str = "root_ca";
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct LogStore {
    db: Mutex<Option<Database>>,
    certificates: AsyncMutex<CertificateLog>,
    channels: AsyncMutex<GrowOnlyLog<PublicChannel>>,
    messages: AsyncMutex<GrowOnlyLog<ChannelMessage>>,
    files: AsyncMutex<GrowOnlyLog<FileMetadata>>,
    dm_users: AsyncMutex<GrowOnlyLog<DmUser>>,
    conversations: AsyncMutex<GrowOnlyLog<Conversation>>,
    direct_messages: AsyncMutex<GrowOnlyLog<DirectMessage>>,
    registry: RwLock<MembershipRegistry>,
    enforce_membership: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl LogStore {
    /// Open (or create) the store whose database lives in `db_dir`.
    pub fn open(db_dir: &Path, enforce_membership: bool) -> Result<Self> {
        let db = Database::open_at(&db_dir.join(DB_FILE_NAME))?;
        let store = Self::from_database(db, enforce_membership)?;
        info!(path = %db_dir.display(), "log store opened");
        Ok(store)
    }

    pub fn open_in_memory(enforce_membership: bool) -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, enforce_membership)
    }

    fn from_database(db: Database, enforce_membership: bool) -> Result<Self> {
        let registry = match db.get_meta(ROOT_CA_KEY)? {
            Some(pem) => MembershipRegistry::from_root_pem(&pem)?,
            None => MembershipRegistry::default(),
        };

        let certificates = GrowOnlyLog::from_entries(db.list_certificates()?);
        let channels = GrowOnlyLog::from_entries(db.list_channels()?);
        let messages = GrowOnlyLog::from_entries(db.list_messages()?);
        let files = GrowOnlyLog::from_entries(db.list_files()?);
        let dm_users = GrowOnlyLog::from_entries(db.list_dm_users()?);
        let conversations = GrowOnlyLog::from_entries(db.list_conversations()?);
        let direct_messages = GrowOnlyLog::from_entries(db.list_direct_messages()?);

        debug!(
            certificates = certificates.len(),
            channels = channels.len(),
            messages = messages.len(),
            files = files.len(),
            "loaded replicated collections"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db: Mutex::new(Some(db)),
            certificates: AsyncMutex::new(certificates),
            channels: AsyncMutex::new(channels),
            messages: AsyncMutex::new(messages),
            files: AsyncMutex::new(files),
            dm_users: AsyncMutex::new(dm_users),
            conversations: AsyncMutex::new(conversations),
            direct_messages: AsyncMutex::new(direct_messages),
            registry: RwLock::new(registry),
            enforce_membership,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(db)
    }

    fn registry(&self) -> Result<MembershipRegistry> {
        Ok(self.registry.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    /// Flush and close the database. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?.take();
        match db {
            Some(db) => {
                db.checkpoint()?;
                db.close()?;
                info!("log store closed");
            }
            None => debug!("log store already closed"),
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.db.lock().map(|db| db.is_none()).unwrap_or(true)
    }

    /// Offer one entry to a first-write-wins collection.
    async fn append_entry<T: LogEntry>(
        &self,
        log: &AsyncMutex<GrowOnlyLog<T>>,
        entry: T,
        persist: impl FnOnce(&Database, &T) -> Result<bool>,
        event: impl FnOnce(T) -> StoreEvent,
    ) -> Result<AppendOutcome> {
        let mut log = log.lock().await;
        if log.contains(&entry.log_key()) {
            return Ok(AppendOutcome::Duplicate);
        }
        self.with_db(|db| persist(db, &entry))?;
        log.insert(entry.clone());
        drop(log);
        self.emit(event(entry));
        Ok(AppendOutcome::Accepted)
    }

    // ---------------------------------------------------------------
    // Certificates
    // ---------------------------------------------------------------

    /// Set the community root CA that every member certificate must chain to.
    pub fn set_root_ca(&self, pem: &str) -> Result<()> {
        let registry = MembershipRegistry::from_root_pem(pem)?;
        self.with_db(|db| db.set_meta(ROOT_CA_KEY, pem.trim()))?;
        *self.registry.write().map_err(|_| StoreError::Poisoned)? = registry;
        Ok(())
    }

    pub fn root_ca(&self) -> Option<Certificate> {
        self.registry
            .read()
            .ok()
            .and_then(|r| r.root().cloned())
    }

    pub async fn append_certificate(&self, pem: &str) -> Result<AppendOutcome> {
        let registry = self.registry()?;
        let mut log = self.certificates.lock().await;
        let stored = match registry.admit(&log, pem, Utc::now()) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(AppendOutcome::Duplicate),
            Err(rejection) => {
                debug!(reason = %rejection, "certificate rejected");
                return Ok(AppendOutcome::Rejected(rejection));
            }
        };
        self.with_db(|db| db.insert_certificate(&stored))?;
        let event = StoreEvent::CertificateAdded {
            username: stored.username().to_string(),
            public_key: stored.certificate.public_key_hex(),
        };
        log.insert(stored);
        drop(log);
        self.emit(event);
        Ok(AppendOutcome::Accepted)
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let registry = self.registry()?;
        let log = self.certificates.lock().await;
        Ok(registry.username_exists(&log, username, Utc::now()))
    }

    /// Username check for a renewal: the key's own certificates do not count.
    pub async fn username_held_by_other(&self, username: &str, public_key_hex: &str) -> Result<bool> {
        let registry = self.registry()?;
        let log = self.certificates.lock().await;
        Ok(registry.username_held_by_other(&log, username, public_key_hex, Utc::now()))
    }

    pub async fn is_member(&self, public_key_hex: &str) -> Result<bool> {
        let registry = self.registry()?;
        let log = self.certificates.lock().await;
        Ok(registry.is_member(&log, public_key_hex, Utc::now()))
    }

    /// Certificate strings that are currently valid.
    pub async fn valid_certificates(&self) -> Result<Vec<String>> {
        let registry = self.registry()?;
        let log = self.certificates.lock().await;
        Ok(registry
            .valid(&log, Utc::now())
            .map(|stored| stored.pem.clone())
            .collect())
    }

    /// Every certificate variant held, valid or not.
    pub async fn all_certificates(&self) -> Vec<String> {
        let log = self.certificates.lock().await;
        log.iter().map(|stored| stored.pem.clone()).collect()
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Append a message received from a peer, as raw JSON.
    pub async fn append_message_value(&self, value: &Value) -> Result<AppendOutcome> {
        self.ingest_message(value, None).await
    }

    pub async fn append_message(&self, message: &ChannelMessage) -> Result<AppendOutcome> {
        self.ingest_message(&serde_json::to_value(message)?, None).await
    }

    /// Append a message authored on this node; it starts out `Pending`.
    pub async fn append_local_message(&self, message: &ChannelMessage) -> Result<AppendOutcome> {
        self.ingest_message(&serde_json::to_value(message)?, Some(SendingStatus::Pending))
            .await
    }

    async fn ingest_message(
        &self,
        value: &Value,
        status: Option<SendingStatus>,
    ) -> Result<AppendOutcome> {
        let message = match validate_message(value) {
            Ok(message) => message,
            Err(e) => return Ok(Rejection::Schema(e).into()),
        };
        if let Err(e) = verify_message_signature(&message) {
            warn!(id = %message.id, error = %e, "dropping message with bad signature");
            return Ok(Rejection::Signature.into());
        }
        if self.enforce_membership && !self.is_member(&message.pub_key).await? {
            debug!(id = %message.id, author = %message.pub_key, "dropping message from non-member");
            return Ok(Rejection::UnknownAuthor.into());
        }

        self.append_entry(
            &self.messages,
            message,
            |db, m| db.insert_message(m, status),
            StoreEvent::MessageAppended,
        )
        .await
    }

    /// Messages of one channel in acceptance order.
    pub async fn messages(&self, channel: &ChannelAddress) -> Vec<ChannelMessage> {
        let log = self.messages.lock().await;
        log.iter()
            .filter(|m| &m.channel_address == channel)
            .cloned()
            .collect()
    }

    pub async fn message(&self, id: &str) -> Option<ChannelMessage> {
        self.messages.lock().await.get(id).cloned()
    }

    pub async fn message_ids(&self, channel: &ChannelAddress) -> Vec<String> {
        let log = self.messages.lock().await;
        log.iter()
            .filter(|m| &m.channel_address == channel)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Ids from `known` that are not held locally.
    pub async fn missing_message_ids(&self, known: &[String]) -> Vec<String> {
        let log = self.messages.lock().await;
        log.missing(known).into_iter().cloned().collect()
    }

    /// Attach resolved media (e.g. the local path after a download) to the
    /// message referenced by `media.message`. The content id must match the
    /// media the message was signed with, and only the replica-local `path`
    /// and `size` are taken from `media`.
    pub async fn update_message_media(&self, media: &FileMetadata) -> Result<AppendOutcome> {
        let Some(reference) = &media.message else {
            return Ok(Rejection::Schema(SchemaError::Missing("media.message".into())).into());
        };
        let mut log = self.messages.lock().await;
        let Some(message) = log.get_mut(&reference.id) else {
            return Err(StoreError::NotFound);
        };
        let matches = message
            .media
            .as_ref()
            .is_some_and(|current| current.cid == media.cid);
        if !matches || message.channel_address != reference.channel_address {
            return Ok(Rejection::MediaMismatch(reference.id.clone()).into());
        }

        let mut updated = message.clone();
        let Some(merged) = updated.media.as_mut() else {
            return Ok(Rejection::MediaMismatch(reference.id.clone()).into());
        };
        merged.path = media.path.clone();
        merged.size = media.size;
        let merged = merged.clone();
        self.with_db(|db| db.update_message_payload(&updated))?;
        *message = updated;
        drop(log);

        self.emit(StoreEvent::MessageMediaUpdated {
            message_id: reference.id.clone(),
            channel_address: reference.channel_address.clone(),
            media: merged,
        });
        Ok(AppendOutcome::Accepted)
    }

    pub async fn set_sending_status(&self, id: &str, status: SendingStatus) -> Result<bool> {
        let _log = self.messages.lock().await;
        self.with_db(|db| db.set_sending_status(id, status))
    }

    pub async fn sending_status(&self, id: &str) -> Result<Option<SendingStatus>> {
        let _log = self.messages.lock().await;
        self.with_db(|db| db.get_sending_status(id))
    }

    // ---------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------

    pub async fn append_channel_value(&self, value: &Value) -> Result<AppendOutcome> {
        let channel = match validate_channel(value) {
            Ok(channel) => channel,
            Err(e) => return Ok(Rejection::Schema(e).into()),
        };
        self.append_entry(
            &self.channels,
            channel,
            |db, c| db.insert_channel(c),
            StoreEvent::ChannelAdded,
        )
        .await
    }

    pub async fn append_channel(&self, channel: &PublicChannel) -> Result<AppendOutcome> {
        self.append_channel_value(&serde_json::to_value(channel)?).await
    }

    pub async fn channels(&self) -> Vec<PublicChannel> {
        self.channels.lock().await.iter().cloned().collect()
    }

    pub async fn channel(&self, address: &ChannelAddress) -> Option<PublicChannel> {
        self.channels.lock().await.get(address.as_str()).cloned()
    }

    /// Change the description of a channel. Only its owner may do so;
    /// returns `false` otherwise or when the channel is unknown.
    pub async fn update_channel_description(
        &self,
        address: &ChannelAddress,
        requester: &str,
        description: &str,
    ) -> Result<bool> {
        let mut log = self.channels.lock().await;
        let Some(channel) = log.get_mut(address.as_str()) else {
            return Ok(false);
        };
        if channel.owner != requester {
            warn!(channel = %address, requester, "description update by non-owner refused");
            return Ok(false);
        }
        self.with_db(|db| db.update_channel_description(address, description))?;
        channel.description = description.to_string();
        let updated = channel.clone();
        drop(log);
        self.emit(StoreEvent::ChannelUpdated(updated));
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Hosted files
    // ---------------------------------------------------------------

    pub async fn append_file(&self, metadata: &FileMetadata) -> Result<AppendOutcome> {
        if !metadata.cid.is_well_formed() {
            return Ok(Rejection::Schema(SchemaError::WrongType {
                field: "cid".into(),
                expected: "a content id",
            })
            .into());
        }
        self.append_entry(
            &self.files,
            metadata.clone(),
            |db, f| db.insert_file(f),
            StoreEvent::FileHosted,
        )
        .await
    }

    pub async fn files(&self) -> Vec<FileMetadata> {
        self.files.lock().await.iter().cloned().collect()
    }

    pub async fn file(&self, cid: &Cid) -> Option<FileMetadata> {
        self.files.lock().await.get(cid.as_str()).cloned()
    }

    // ---------------------------------------------------------------
    // Direct-message directory
    // ---------------------------------------------------------------

    pub async fn append_dm_user(&self, user: DmUser) -> Result<AppendOutcome> {
        if !validate_user(&user.public_key, &user.half_key) {
            return Ok(Rejection::InvalidDirectoryEntry.into());
        }
        self.append_entry(
            &self.dm_users,
            user,
            |db, u| db.insert_dm_user(u),
            StoreEvent::DmUserAdded,
        )
        .await
    }

    pub async fn dm_users(&self) -> Vec<DmUser> {
        self.dm_users.lock().await.iter().cloned().collect()
    }

    pub async fn append_conversation(&self, conversation: Conversation) -> Result<AppendOutcome> {
        if !validate_conversation_key(&conversation.public_key, &conversation.encrypted_phrase) {
            return Ok(Rejection::InvalidDirectoryEntry.into());
        }
        self.append_entry(
            &self.conversations,
            conversation,
            |db, c| db.insert_conversation(c),
            StoreEvent::ConversationAdded,
        )
        .await
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.conversations.lock().await.iter().cloned().collect()
    }

    pub async fn append_direct_message(&self, message: DirectMessage) -> Result<AppendOutcome> {
        if message.conversation.is_empty() || !validate_direct_message(&message.payload) {
            return Ok(Rejection::InvalidDirectoryEntry.into());
        }
        self.append_entry(
            &self.direct_messages,
            message,
            |db, m| db.insert_direct_message(m),
            StoreEvent::DirectMessageAdded,
        )
        .await
    }

    pub async fn direct_messages(&self, conversation: &str) -> Vec<DirectMessage> {
        let log = self.direct_messages.lock().await;
        log.iter()
            .filter(|m| m.conversation == conversation)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hearth_shared::certificate::{
        issue_csr_with_identity, sign_certificate, HashAlgorithm, RootCa, SignAlgorithm, Subject,
    };
    use hearth_shared::dm::{seal_direct_message, DmKeys};
    use hearth_shared::files::MessageRef;
    use hearth_shared::identity::Identity;
    use hearth_shared::message::MessageType;
    use hearth_shared::types::Timestamp;

    struct Fixture {
        store: LogStore,
        root: RootCa,
        member: Identity,
    }

    fn certify(root: &RootCa, identity: &Identity, nickname: &str) -> String {
        let now = Utc::now();
        let csr = issue_csr_with_identity(
            Subject {
                nickname: nickname.into(),
                common_name: format!("{nickname}.onion"),
                peer_id: "peer".into(),
                dm_public_key: "dm".into(),
            },
            identity,
            SignAlgorithm::Ed25519,
            HashAlgorithm::Blake3,
        )
        .unwrap();
        sign_certificate(
            &root.certificate,
            &root.private_key,
            &csr.pem,
            now - Duration::minutes(1),
            now + Duration::days(1),
        )
        .unwrap()
    }

    async fn fixture(enforce: bool) -> Fixture {
        let now = Utc::now();
        let root =
            RootCa::generate("community", now - Duration::days(1), now + Duration::days(365))
                .unwrap();
        let store = LogStore::open_in_memory(enforce).unwrap();
        store.set_root_ca(&root.certificate).unwrap();
        let member = Identity::generate();
        let outcome = store
            .append_certificate(&certify(&root, &member, "alice"))
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Accepted);
        Fixture {
            store,
            root,
            member,
        }
    }

    fn message(identity: &Identity, text: &str) -> ChannelMessage {
        ChannelMessage::new_signed(
            identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            text.into(),
            None,
        )
    }

    #[tokio::test]
    async fn test_append_message_is_idempotent() {
        let f = fixture(true).await;
        let msg = message(&f.member, "hello");
        let mut events = f.store.subscribe();

        assert_eq!(f.store.append_message(&msg).await.unwrap(), AppendOutcome::Accepted);
        assert_eq!(f.store.append_message(&msg).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(f.store.messages(&ChannelAddress::new("general")).await, vec![msg.clone()]);
        assert_eq!(events.recv().await.unwrap(), StoreEvent::MessageAppended(msg));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let f = fixture(true).await;
        let mut msg = message(&f.member, "hello");
        msg.message = "changed".into();
        assert_eq!(
            f.store.append_message(&msg).await.unwrap(),
            AppendOutcome::Rejected(Rejection::Signature)
        );
    }

    #[tokio::test]
    async fn test_schema_violation_rejected() {
        let f = fixture(true).await;
        let outcome = f
            .store
            .append_message_value(&serde_json::json!({ "id": "x" }))
            .await
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Rejected(Rejection::Schema(_))));
    }

    #[tokio::test]
    async fn test_membership_enforcement() {
        let f = fixture(true).await;
        let stranger = Identity::generate();
        assert_eq!(
            f.store.append_message(&message(&stranger, "hi")).await.unwrap(),
            AppendOutcome::Rejected(Rejection::UnknownAuthor)
        );

        let open = fixture(false).await;
        assert_eq!(
            open.store.append_message(&message(&stranger, "hi")).await.unwrap(),
            AppendOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_missing_message_ids() {
        let f = fixture(true).await;
        let known = message(&f.member, "known");
        f.store.append_message(&known).await.unwrap();
        let missing = f
            .store
            .missing_message_ids(&[known.id.clone(), "other".to_string()])
            .await;
        assert_eq!(missing, vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn test_sending_status_for_local_messages() {
        let f = fixture(true).await;
        let msg = message(&f.member, "mine");
        f.store.append_local_message(&msg).await.unwrap();
        assert_eq!(
            f.store.sending_status(&msg.id).await.unwrap(),
            Some(SendingStatus::Pending)
        );
        f.store.set_sending_status(&msg.id, SendingStatus::Sent).await.unwrap();
        assert_eq!(f.store.sending_status(&msg.id).await.unwrap(), Some(SendingStatus::Sent));
    }

    #[tokio::test]
    async fn test_username_checks() {
        let f = fixture(true).await;
        assert!(f.store.username_exists("ALICE").await.unwrap());
        assert!(!f.store.username_exists("bob").await.unwrap());

        let other = Identity::generate();
        let outcome = f
            .store
            .append_certificate(&certify(&f.root, &other, "Alíce"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AppendOutcome::Rejected(Rejection::UsernameTaken("Alíce".into()))
        );
        assert_eq!(f.store.valid_certificates().await.unwrap().len(), 1);
        // rejected variants are never appended
        assert_eq!(f.store.all_certificates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_rules() {
        let f = fixture(true).await;
        let channel = PublicChannel::new("general", "first", "owner", Timestamp::from_secs(1));
        assert!(f.store.append_channel(&channel).await.unwrap().is_accepted());

        let mut rewrite = channel.clone();
        rewrite.description = "second".into();
        assert_eq!(f.store.append_channel(&rewrite).await.unwrap(), AppendOutcome::Duplicate);

        assert!(!f
            .store
            .update_channel_description(&channel.address, "intruder", "pwned")
            .await
            .unwrap());
        assert!(f
            .store
            .update_channel_description(&channel.address, "owner", "updated")
            .await
            .unwrap());
        assert_eq!(
            f.store.channel(&channel.address).await.unwrap().description,
            "updated"
        );
    }

    #[tokio::test]
    async fn test_update_message_media() {
        let f = fixture(true).await;
        let cid = Cid::of(b"image");
        let media = FileMetadata::new(cid.clone(), "image", ".png");
        let msg = ChannelMessage::new_signed(
            &f.member,
            ChannelAddress::new("general"),
            MessageType::Image,
            "".into(),
            Some(media.clone()),
        );
        f.store.append_message(&msg).await.unwrap();

        let mut resolved = media.with_message(MessageRef {
            id: msg.id.clone(),
            channel_address: msg.channel_address.clone(),
        });
        resolved.path = Some("/downloads/image.png".into());
        assert!(f.store.update_message_media(&resolved).await.unwrap().is_accepted());

        let stored = f.store.message(&msg.id).await.unwrap();
        assert_eq!(stored.media.unwrap().path.as_deref(), Some("/downloads/image.png"));

        let mut wrong = resolved.clone();
        wrong.cid = Cid::of(b"other");
        assert_eq!(
            f.store.update_message_media(&wrong).await.unwrap(),
            AppendOutcome::Rejected(Rejection::MediaMismatch(msg.id.clone()))
        );
    }

    #[tokio::test]
    async fn test_update_message_media_keeps_signed_fields() {
        let f = fixture(true).await;
        let cid = Cid::of(b"image");
        let media = FileMetadata::new(cid.clone(), "cat", ".png");
        let msg = ChannelMessage::new_signed(
            &f.member,
            ChannelAddress::new("general"),
            MessageType::Image,
            "".into(),
            Some(media.clone()),
        );
        f.store.append_message(&msg).await.unwrap();
        let mut events = f.store.subscribe();

        let mut hosted = FileMetadata::new(cid, "invoice", ".exe").with_message(MessageRef {
            id: msg.id.clone(),
            channel_address: msg.channel_address.clone(),
        });
        hosted.path = Some("/downloads/invoice.exe".into());
        hosted.size = Some(5);
        assert!(f.store.update_message_media(&hosted).await.unwrap().is_accepted());

        let stored = f.store.message(&msg.id).await.unwrap();
        let stored_media = stored.media.clone().unwrap();
        assert_eq!(stored_media.name, "cat");
        assert_eq!(stored_media.ext, ".png");
        assert_eq!(stored_media.path.as_deref(), Some("/downloads/invoice.exe"));
        assert_eq!(stored_media.size, Some(5));
        assert!(verify_message_signature(&stored).is_ok());

        match events.recv().await.unwrap() {
            StoreEvent::MessageMediaUpdated { media, .. } => {
                assert_eq!(media.name, "cat");
                assert_eq!(media.ext, ".png");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dm_directory_validation() {
        let f = fixture(true).await;
        let keys = DmKeys::generate();
        let user = DmUser {
            public_key: keys.announce_key(),
            half_key: DmKeys::generate().public_key_hex(),
        };
        assert!(f.store.append_dm_user(user.clone()).await.unwrap().is_accepted());
        assert_eq!(f.store.append_dm_user(user).await.unwrap(), AppendOutcome::Duplicate);

        let bad = DmUser {
            public_key: "abc".into(),
            half_key: "def".into(),
        };
        assert_eq!(
            f.store.append_dm_user(bad).await.unwrap(),
            AppendOutcome::Rejected(Rejection::InvalidDirectoryEntry)
        );

        let dm = DirectMessage {
            conversation: keys.public_key_hex(),
            payload: seal_direct_message(b"phrase", "hello").unwrap(),
        };
        assert!(f.store.append_direct_message(dm.clone()).await.unwrap().is_accepted());
        assert_eq!(f.store.direct_messages(&dm.conversation).await, vec![dm]);

        let short = DirectMessage {
            conversation: keys.public_key_hex(),
            payload: "aGVsbG8=".into(),
        };
        assert!(!f.store.append_direct_message(short).await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_reopen_restores_collections() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let root = RootCa::generate("c", now - Duration::days(1), now + Duration::days(1)).unwrap();
        let member = Identity::generate();
        let msg = message(&member, "persisted");

        {
            let store = LogStore::open(dir.path(), true).unwrap();
            store.set_root_ca(&root.certificate).unwrap();
            store
                .append_certificate(&certify(&root, &member, "alice"))
                .await
                .unwrap();
            store.append_message(&msg).await.unwrap();
            store.close().unwrap();
            store.close().unwrap();
            assert!(store.is_closed());
        }

        let store = LogStore::open(dir.path(), true).unwrap();
        assert!(store.root_ca().is_some());
        assert!(store.username_exists("alice").await.unwrap());
        assert_eq!(store.message(&msg.id).await, Some(msg.clone()));
        assert_eq!(store.append_message(&msg).await.unwrap(), AppendOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_writes_after_close_fail() {
        let f = fixture(false).await;
        f.store.close().unwrap();
        let result = f.store.append_message(&message(&f.member, "late")).await;
        assert!(matches!(result, Err(StoreError::Closed)));
    }
}
