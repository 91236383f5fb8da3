//! Content-addressed block storage.
//!
//! [`BlockStore`] is the put/get-by-content-id capability the file transfer
//! manager talks to. [`FsBlockStore`] keeps blocks on disk under the
//! community's block directory; [`MemoryBlockStore`] is an in-process
//! substitute that several replicas can share.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hearth_shared::types::Cid;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store `data` and return its content id.
    async fn put(&self, data: Bytes) -> Result<Cid>;

    /// Fetch the bytes stored under `cid`. The returned bytes are whatever
    /// the substrate produced; callers verify them against the id.
    async fn get(&self, cid: &Cid) -> Result<Bytes>;

    async fn has(&self, cid: &Cid) -> Result<bool>;

    async fn remove(&self, cid: &Cid) -> Result<bool>;
}

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => return Err(StoreError::PathTraversal),
            _ => {}
        }
    }
    if !resolved.starts_with(base) {
        return Err(StoreError::PathTraversal);
    }
    Ok(resolved)
}

/// Blocks as files named by content id, fanned out by the first two hex
/// chars: `<base>/ab/abcdef...`.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlockStore {
    /// Open a store rooted at `base_path`. With `create` unset the directory
    /// is only created on the first write.
    pub async fn open(base_path: PathBuf, max_size: usize, create: bool) -> Result<Self> {
        if create {
            fs::create_dir_all(&base_path).await?;
            info!(path = %base_path.display(), "Block store initialized");
        }
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn block_path(&self, cid: &Cid) -> Result<PathBuf> {
        if !cid.is_well_formed() {
            return Err(StoreError::PathTraversal);
        }
        let raw = self.base_path.join(&cid.as_str()[..2]).join(cid.as_str());
        ensure_within(&self.base_path, &raw)
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn put(&self, data: Bytes) -> Result<Cid> {
        if data.len() > self.max_size {
            return Err(StoreError::BlockTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        let cid = Cid::of(&data);
        let path = self.block_path(&cid)?;
        if fs::try_exists(&path).await? {
            return Ok(cid);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // partial writes never appear under the block name
        let tmp = path.with_extension("part");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;

        debug!(cid = %cid.short(), size = data.len(), "Stored block");
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes> {
        let path = self.block_path(cid)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::BlockNotFound(cid.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(fs::try_exists(self.block_path(cid)?).await?)
    }

    async fn remove(&self, cid: &Cid) -> Result<bool> {
        let path = self.block_path(cid)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared in-memory block store.
///
/// Clones share the same blocks, so handing one clone to each replica models
/// a content network every replica can fetch from.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    inner: std::sync::Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: RwLock<HashMap<Cid, Bytes>>,
    latency: RwLock<Option<Duration>>,
    offline: AtomicBool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store arbitrary bytes under `cid` without hashing them.
    pub fn insert_raw(&self, cid: Cid, data: Bytes) {
        if let Ok(mut blocks) = self.inner.blocks.write() {
            blocks.insert(cid, data);
        }
    }

    /// Delay every `get` by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.inner.latency.write() {
            *slot = latency;
        }
    }

    /// While offline every `get` fails as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.blocks.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, data: Bytes) -> Result<Cid> {
        let cid = Cid::of(&data);
        self.inner
            .blocks
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(cid.clone(), data);
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes> {
        let latency = *self.inner.latency.read().map_err(|_| StoreError::Poisoned)?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::BlockUnavailable("content network unreachable".into()));
        }
        self.inner
            .blocks
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(cid)
            .cloned()
            .ok_or_else(|| StoreError::BlockNotFound(cid.clone()))
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self
            .inner
            .blocks
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .contains_key(cid))
    }

    async fn remove(&self, cid: &Cid) -> Result<bool> {
        Ok(self
            .inner
            .blocks
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(cid)
            .is_some())
    }
}
