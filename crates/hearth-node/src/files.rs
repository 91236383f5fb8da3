//! Content-addressed file transfer.
//!
//! Every tracked content id moves through
//! `Pending -> Downloading -> {Completed | Canceled | Malicious}`.
//! A canceled or malicious download can be started again; a transport
//! failure puts the id back to `Pending` and leaves the retry to the caller.
//! Statuses stay in memory until [`FileTransferManager::remove_download_status`]
//! is called.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use hearth_net::PubSub;
use hearth_shared::files::DownloadProgress;
use hearth_shared::protocol::PeerMessage;
use hearth_shared::types::{Cid, CommunityId};
use hearth_shared::{DownloadPhase, DownloadStatus, FileContent, FileMetadata};
use hearth_store::{AppendOutcome, BlockStore, LogStore, StoreError};
use tokio::fs;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

#[derive(Default)]
struct Tracking {
    statuses: HashMap<Cid, DownloadStatus>,
    cancels: HashMap<Cid, watch::Sender<bool>>,
    attempts: HashMap<Cid, u32>,
    /// Generation of the fetch currently allowed to settle each id.
    running: HashMap<Cid, u64>,
    next_generation: u64,
}

pub struct FileTransferManager {
    community_id: CommunityId,
    store: Arc<LogStore>,
    blocks: Arc<dyn BlockStore>,
    transport: Arc<dyn PubSub>,
    downloads_dir: PathBuf,
    max_file_size: usize,
    download_timeout: Duration,
    tracking: Mutex<Tracking>,
    events: broadcast::Sender<EngineEvent>,
}

impl FileTransferManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        community_id: CommunityId,
        store: Arc<LogStore>,
        blocks: Arc<dyn BlockStore>,
        transport: Arc<dyn PubSub>,
        downloads_dir: PathBuf,
        max_file_size: usize,
        download_timeout: Duration,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            community_id,
            store,
            blocks,
            transport,
            downloads_dir,
            max_file_size,
            download_timeout,
            tracking: Mutex::new(Tracking::default()),
            events,
        }
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_status(&self, status: DownloadStatus) {
        let _ = self.events.send(EngineEvent::DownloadStatus(status));
    }

    fn set_phase(&self, cid: &Cid, phase: DownloadPhase, progress: Option<DownloadProgress>) {
        let status = {
            let mut tracking = self.tracking();
            let status = tracking
                .statuses
                .entry(cid.clone())
                .or_insert_with(|| DownloadStatus::new(cid.clone(), phase));
            status.phase = phase;
            if progress.is_some() {
                status.progress = progress;
            }
            status.clone()
        };
        self.publish_status(status);
    }

    /// Final transition of fetch `generation`. A cancel that raced the
    /// fetch wins, and a fetch superseded by a restart or a status removal
    /// settles nothing.
    fn settle(
        &self,
        cid: &Cid,
        generation: u64,
        phase: DownloadPhase,
        progress: Option<DownloadProgress>,
    ) -> DownloadPhase {
        let status = {
            let mut tracking = self.tracking();
            if tracking.running.get(cid) != Some(&generation) {
                return DownloadPhase::Canceled;
            }
            tracking.running.remove(cid);
            tracking.cancels.remove(cid);
            match tracking.statuses.get_mut(cid) {
                Some(status) if status.phase == DownloadPhase::Canceled => {
                    return DownloadPhase::Canceled;
                }
                Some(status) => {
                    status.phase = phase;
                    if progress.is_some() {
                        status.progress = progress;
                    }
                    status.clone()
                }
                None => return DownloadPhase::Canceled,
            }
        };
        if phase == DownloadPhase::Completed {
            self.tracking().attempts.remove(cid);
        }
        self.publish_status(status);
        phase
    }

    /// Store bytes in the block store and keep a local copy.
    /// Announcing the file is a separate step.
    pub async fn upload_file(&self, content: FileContent) -> Result<FileMetadata> {
        let size = content.bytes.len();
        if size > self.max_file_size {
            return Err(EngineError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let bytes = Bytes::from(content.bytes);
        let cid = self.blocks.put(bytes.clone()).await?;

        let mut metadata = FileMetadata::new(cid.clone(), content.name, content.ext);
        metadata.size = Some(size as u64);
        metadata.path = Some(self.materialize(&metadata, &bytes).await?);

        // bytes are already local, nothing to download
        self.set_phase(
            &cid,
            DownloadPhase::Completed,
            Some(DownloadProgress {
                downloaded: size as u64,
                size: Some(size as u64),
            }),
        );

        info!(cid = %cid.short(), name = %metadata.name, size, "File uploaded");
        Ok(metadata)
    }

    /// Record the file in the replicated file log and announce it on the
    /// community topic. Announcing an already known content id again only
    /// repeats the announcement.
    pub async fn broadcast_hosted_file(&self, metadata: &FileMetadata) -> Result<AppendOutcome> {
        let mut announced = metadata.clone();
        announced.path = None;

        let outcome = self.store.append_file(&announced).await?;
        if let AppendOutcome::Rejected(rejection) = outcome {
            return Err(rejection.into());
        }

        let envelope = PeerMessage::FileHosted {
            metadata: announced,
        };
        self.transport
            .publish(&self.community_id.to_topic(), envelope.to_bytes()?)
            .await?;
        debug!(cid = %metadata.cid.short(), ?outcome, "Hosted file announced");
        Ok(outcome)
    }

    /// Fetch, verify and save the file behind `metadata`.
    ///
    /// Returns `Completed` or `Canceled`, or `Downloading` when another fetch
    /// of the same id is already running. Mismatching bytes mark the id
    /// `Malicious` and return [`EngineError::ContentMismatch`]; a fetch
    /// failure or timeout puts it back to `Pending` and returns the error.
    pub async fn download_file(&self, metadata: &FileMetadata) -> Result<DownloadPhase> {
        self.fetch(metadata, false).await
    }

    /// Run a download. With `queued` set the fetch only starts while the id
    /// is still `Pending`, so a cancel or removal issued between
    /// [`Self::queue`] and the spawned task sticks.
    async fn fetch(&self, metadata: &FileMetadata, queued: bool) -> Result<DownloadPhase> {
        let cid = metadata.cid.clone();
        if !cid.is_well_formed() {
            return Err(EngineError::SchemaInvalid(format!(
                "{cid:?} is not a content id"
            )));
        }

        let (generation, mut cancel_rx, status) = {
            let mut tracking = self.tracking();
            let phase = tracking.statuses.get(&cid).map(|s| s.phase);
            match phase {
                Some(DownloadPhase::Completed) => return Ok(DownloadPhase::Completed),
                Some(DownloadPhase::Downloading) => return Ok(DownloadPhase::Downloading),
                Some(DownloadPhase::Pending) => {}
                _ if queued => {
                    debug!(cid = %cid.short(), ?phase, "Queued download no longer pending");
                    return Ok(phase.unwrap_or(DownloadPhase::Canceled));
                }
                _ => {}
            }
            let (tx, rx) = watch::channel(false);
            tracking.cancels.insert(cid.clone(), tx);
            tracking.next_generation += 1;
            let generation = tracking.next_generation;
            tracking.running.insert(cid.clone(), generation);
            let status = tracking
                .statuses
                .entry(cid.clone())
                .or_insert_with(|| DownloadStatus::new(cid.clone(), DownloadPhase::Downloading));
            status.phase = DownloadPhase::Downloading;
            status.progress = Some(DownloadProgress {
                downloaded: 0,
                size: metadata.size,
            });
            (generation, rx, status.clone())
        };

        self.publish_status(status);
        debug!(cid = %cid.short(), name = %metadata.name, "Download started");

        let fetched = tokio::select! {
            _ = cancel_rx.changed() => None,
            res = tokio::time::timeout(self.download_timeout, self.blocks.get(&cid)) => Some(res),
        };

        let bytes = match fetched {
            None => {
                info!(cid = %cid.short(), "Download canceled");
                return Ok(self.settle(&cid, generation, DownloadPhase::Canceled, None));
            }
            Some(Err(_elapsed)) => {
                warn!(cid = %cid.short(), "Download timed out");
                self.settle(&cid, generation, DownloadPhase::Pending, None);
                return Err(EngineError::PeerUnresponsive(cid.to_string()));
            }
            Some(Ok(Err(e))) => {
                warn!(cid = %cid.short(), error = %e, "Download failed");
                self.settle(&cid, generation, DownloadPhase::Pending, None);
                return Err(e.into());
            }
            Some(Ok(Ok(bytes))) => bytes,
        };

        if *cancel_rx.borrow() {
            return Ok(self.settle(&cid, generation, DownloadPhase::Canceled, None));
        }

        if !cid.matches(&bytes) {
            warn!(cid = %cid.short(), len = bytes.len(), "Fetched bytes do not match content id, discarding");
            self.settle(&cid, generation, DownloadPhase::Malicious, None);
            return Err(EngineError::ContentMismatch(cid));
        }

        let path = match self.materialize(metadata, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                self.settle(&cid, generation, DownloadPhase::Pending, None);
                return Err(e);
            }
        };

        let len = bytes.len() as u64;
        let phase = self.settle(
            &cid,
            generation,
            DownloadPhase::Completed,
            Some(DownloadProgress {
                downloaded: len,
                size: Some(len),
            }),
        );
        if phase != DownloadPhase::Completed {
            return Ok(phase);
        }
        info!(cid = %cid.short(), path = %path, "Download completed");

        let mut resolved = metadata.clone();
        resolved.path = Some(path);
        resolved.size = Some(len);
        if resolved.message.is_some() {
            self.attach_media(&resolved).await;
        }
        Ok(DownloadPhase::Completed)
    }

    /// Point the originating message at the downloaded file.
    async fn attach_media(&self, media: &FileMetadata) {
        match self.store.update_message_media(media).await {
            Ok(AppendOutcome::Accepted) => {}
            Ok(outcome) => debug!(cid = %media.cid.short(), ?outcome, "Media not attached"),
            Err(StoreError::NotFound) => {
                debug!(cid = %media.cid.short(), "Message for downloaded media not known yet")
            }
            Err(e) => warn!(cid = %media.cid.short(), error = %e, "Failed to attach media"),
        }
    }

    /// Cancel an in-flight download. Returns `false` when there is nothing
    /// to cancel.
    pub fn cancel_download(&self, cid: &Cid) -> bool {
        let status = {
            let mut tracking = self.tracking();
            let Some(status) = tracking.statuses.get_mut(cid) else {
                return false;
            };
            if !status.phase.is_in_flight() {
                return false;
            }
            status.phase = DownloadPhase::Canceled;
            let status = status.clone();
            if let Some(cancel) = tracking.cancels.remove(cid) {
                let _ = cancel.send(true);
            }
            status
        };
        info!(cid = %cid.short(), "Download cancel requested");
        self.publish_status(status);
        true
    }

    pub fn remove_download_status(&self, cid: &Cid) -> Option<DownloadStatus> {
        let removed = {
            let mut tracking = self.tracking();
            tracking.cancels.remove(cid);
            tracking.attempts.remove(cid);
            tracking.running.remove(cid);
            tracking.statuses.remove(cid)
        };
        if removed.is_some() {
            let _ = self.events.send(EngineEvent::DownloadStatusRemoved(cid.clone()));
        }
        removed
    }

    pub fn download_status(&self, cid: &Cid) -> Option<DownloadStatus> {
        self.tracking().statuses.get(cid).cloned()
    }

    pub fn download_statuses(&self) -> Vec<DownloadStatus> {
        self.tracking().statuses.values().cloned().collect()
    }

    /// Track `cid` as `Pending` if it is neither tracked nor finished.
    /// Returns whether a download should be started.
    pub(crate) fn queue(&self, cid: &Cid) -> bool {
        {
            let tracking = self.tracking();
            if tracking.statuses.contains_key(cid) {
                return false;
            }
        }
        self.set_phase(cid, DownloadPhase::Pending, None);
        true
    }

    /// Queue and start a download in the background.
    pub(crate) fn spawn_download(self: &Arc<Self>, metadata: FileMetadata) {
        if !self.queue(&metadata.cid) {
            self.spawn_attach_if_completed(metadata);
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.fetch(&metadata, true).await {
                warn!(cid = %metadata.cid.short(), error = %e, "Background download failed");
            }
        });
    }

    /// The bytes may have arrived before the message that references them.
    fn spawn_attach_if_completed(self: &Arc<Self>, metadata: FileMetadata) {
        let completed = self.download_status(&metadata.cid).map(|s| s.phase)
            == Some(DownloadPhase::Completed);
        if !completed || metadata.message.is_none() {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let path = manager.local_path(&metadata);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return;
            }
            let mut resolved = metadata;
            resolved.path = Some(path.to_string_lossy().into_owned());
            manager.attach_media(&resolved).await;
        });
    }

    /// Re-issue downloads for known files that are not on disk, at most
    /// `max_attempts` times per content id. Canceled downloads are left
    /// alone. Returns how many downloads were started.
    pub async fn check_for_missing_files(&self, max_attempts: u32) -> usize {
        let mut due = Vec::new();
        for metadata in self.store.files().await {
            let mut tracking = self.tracking();
            let phase = tracking.statuses.get(&metadata.cid).map(|s| s.phase);
            if matches!(
                phase,
                Some(DownloadPhase::Completed | DownloadPhase::Downloading | DownloadPhase::Canceled)
            ) {
                continue;
            }
            let attempts = tracking.attempts.entry(metadata.cid.clone()).or_insert(0);
            if *attempts >= max_attempts {
                debug!(cid = %metadata.cid.short(), attempts = *attempts, "Giving up on missing file");
                continue;
            }
            *attempts += 1;
            due.push(metadata);
        }

        let started = due.len();
        if started > 0 {
            info!(count = started, community = %self.community_id, "Re-issuing missing file downloads");
        }
        let results = join_all(due.iter().map(|m| self.download_file(m))).await;
        for (metadata, result) in due.iter().zip(results) {
            if let Err(e) = result {
                debug!(cid = %metadata.cid.short(), error = %e, "Missing file still unavailable");
            }
        }
        started
    }

    /// Cancel everything in flight, e.g. on shutdown.
    pub fn cancel_all(&self) {
        let in_flight: Vec<Cid> = self
            .tracking()
            .statuses
            .values()
            .filter(|s| s.phase.is_in_flight())
            .map(|s| s.cid.clone())
            .collect();
        for cid in in_flight {
            self.cancel_download(&cid);
        }
    }

    /// Write `bytes` to `<downloads>/<cid>/<file name>`.
    fn local_path(&self, metadata: &FileMetadata) -> PathBuf {
        self.downloads_dir
            .join(metadata.cid.as_str())
            .join(metadata.file_name())
    }

    async fn materialize(&self, metadata: &FileMetadata, bytes: &[u8]) -> Result<String> {
        let path = self.local_path(metadata);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        write_atomically(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("part");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}
