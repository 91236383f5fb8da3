mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{certify, community, eventually, options, peer, root_ca};
use hearth_net::MemoryHub;
use hearth_node::{EngineError, StorageOptions};
use hearth_shared::types::Cid;
use hearth_shared::{DownloadPhase, FileContent, FileMetadata, Identity};
use hearth_store::{BlockStore, MemoryBlockStore};
use tempfile::TempDir;

const PICTURE: &[u8] = b"\x89PNG not really a picture";

fn shared(blocks: &MemoryBlockStore) -> Option<Arc<dyn BlockStore>> {
    Some(Arc::new(blocks.clone()))
}

#[tokio::test]
async fn test_upload_then_download_on_other_replica() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let community = community(&root_ca());

    let a = peer(&hub, "peer-a", &dir, options(), shared(&blocks));
    let b = peer(&hub, "peer-b", &dir, options(), shared(&blocks));
    let a_storage = a.node.launch_community(&community).await.unwrap();
    let b_storage = b.node.launch_community(&community).await.unwrap();

    let uploaded = a_storage
        .upload_file(FileContent::new("cat", ".png", PICTURE.to_vec()))
        .await
        .unwrap();
    assert_eq!(uploaded.cid, Cid::of(PICTURE));
    assert_eq!(uploaded.size, Some(PICTURE.len() as u64));
    let local = uploaded.path.clone().unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), PICTURE);
    assert_eq!(
        a_storage.download_status(&uploaded.cid).unwrap().unwrap().phase,
        DownloadPhase::Completed
    );

    let mut announced = uploaded.clone();
    announced.path = None;
    let phase = b_storage.download_file(&announced).await.unwrap();
    assert_eq!(phase, DownloadPhase::Completed);

    let fetched = b_storage
        .paths()
        .downloads_dir
        .join(uploaded.cid.as_str())
        .join("cat.png");
    assert_eq!(std::fs::read(fetched).unwrap(), PICTURE);

    // already complete, nothing to do
    assert_eq!(
        b_storage.download_file(&announced).await.unwrap(),
        DownloadPhase::Completed
    );
}

#[tokio::test]
async fn test_tampered_block_is_malicious() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let community = community(&root_ca());

    let b = peer(&hub, "peer-b", &dir, options(), shared(&blocks));
    let storage = b.node.launch_community(&community).await.unwrap();

    let cid = Cid::of(PICTURE);
    blocks.insert_raw(cid.clone(), Bytes::from_static(b"something else entirely"));
    let metadata = FileMetadata::new(cid.clone(), "cat", ".png");

    let err = storage.download_file(&metadata).await.unwrap_err();
    assert!(matches!(err, EngineError::ContentMismatch(c) if c == cid));
    assert_eq!(
        storage.download_status(&cid).unwrap().unwrap().phase,
        DownloadPhase::Malicious
    );
    assert!(!storage
        .paths()
        .downloads_dir
        .join(cid.as_str())
        .join("cat.png")
        .exists());
}

#[tokio::test]
async fn test_cancel_then_restart_completes() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let community = community(&root_ca());

    let b = peer(&hub, "peer-b", &dir, options(), shared(&blocks));
    let storage = b.node.launch_community(&community).await.unwrap();

    let cid = blocks.put(Bytes::from_static(PICTURE)).await.unwrap();
    let metadata = FileMetadata::new(cid.clone(), "cat", ".png");
    blocks.set_latency(Some(Duration::from_millis(500)));

    let download = tokio::spawn({
        let storage = storage.clone();
        let metadata = metadata.clone();
        async move { storage.download_file(&metadata).await }
    });
    assert!(
        eventually(|| {
            let storage = storage.clone();
            let cid = cid.clone();
            async move {
                storage.download_status(&cid).unwrap().map(|s| s.phase)
                    == Some(DownloadPhase::Downloading)
            }
        })
        .await
    );

    assert!(storage.cancel_download(&cid).unwrap());
    assert_eq!(download.await.unwrap().unwrap(), DownloadPhase::Canceled);
    assert_eq!(
        storage.download_status(&cid).unwrap().unwrap().phase,
        DownloadPhase::Canceled
    );
    // nothing in flight any more
    assert!(!storage.cancel_download(&cid).unwrap());

    blocks.set_latency(None);
    assert_eq!(
        storage.download_file(&metadata).await.unwrap(),
        DownloadPhase::Completed
    );

    let removed = storage.remove_download_status(&cid).unwrap().unwrap();
    assert_eq!(removed.phase, DownloadPhase::Completed);
    assert!(storage.download_status(&cid).unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_block_goes_back_to_pending() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let community = community(&root_ca());

    let b = peer(&hub, "peer-b", &dir, options(), shared(&blocks));
    let storage = b.node.launch_community(&community).await.unwrap();

    let cid = blocks.put(Bytes::from_static(PICTURE)).await.unwrap();
    blocks.set_offline(true);
    let metadata = FileMetadata::new(cid.clone(), "cat", ".png");

    assert!(storage.download_file(&metadata).await.is_err());
    assert_eq!(
        storage.download_status(&cid).unwrap().unwrap().phase,
        DownloadPhase::Pending
    );
}

#[tokio::test]
async fn test_media_message_is_fetched_automatically() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let root = root_ca();
    let community = community(&root);
    let auto = StorageOptions {
        auto_download: true,
        ..options()
    };

    let a = peer(&hub, "peer-a", &dir, auto.clone(), shared(&blocks));
    let b = peer(&hub, "peer-b", &dir, auto, shared(&blocks));
    let a_storage = a.node.launch_community(&community).await.unwrap();
    let b_storage = b.node.launch_community(&community).await.unwrap();

    let alice = Identity::generate();
    assert!(a_storage.save_certificate(Some(&certify(&root, &alice, "alice"))).await);
    let general = a_storage
        .create_channel("general", "", &alice.public_key_hex())
        .await
        .unwrap();
    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let address = general.address.clone();
            async move {
                b_storage.is_subscribed(&address) && b_storage.username_exists("alice").await.unwrap()
            }
        })
        .await
    );

    let uploaded = a_storage
        .upload_file(FileContent::new("cat", ".png", PICTURE.to_vec()))
        .await
        .unwrap();
    let sent = a_storage
        .send_message(&alice, &general.address, "look".into(), Some(uploaded.clone()))
        .await
        .unwrap();
    assert!(sent.media.as_ref().unwrap().path.is_none());

    // sender keeps its local path on the stored copy
    let stored = a_storage.store().unwrap().message(&sent.id).await.unwrap();
    assert_eq!(stored.media.unwrap().path, uploaded.path);

    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let id = sent.id.clone();
            async move {
                b_storage
                    .store()
                    .unwrap()
                    .message(&id)
                    .await
                    .and_then(|m| m.media)
                    .and_then(|media| media.path)
                    .is_some()
            }
        })
        .await
    );
    assert_eq!(
        b_storage.download_status(&uploaded.cid).unwrap().unwrap().phase,
        DownloadPhase::Completed
    );
    assert_eq!(b_storage.hosted_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_files_sweep_retries() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let blocks = MemoryBlockStore::new();
    let community = community(&root_ca());

    let a = peer(&hub, "peer-a", &dir, options(), shared(&blocks));
    let storage = a.node.launch_community(&community).await.unwrap();

    let cid = blocks.put(Bytes::from_static(PICTURE)).await.unwrap();
    storage
        .broadcast_hosted_file(&FileMetadata::new(cid.clone(), "cat", ".png"))
        .await
        .unwrap();

    assert_eq!(a.node.check_for_missing_files(&community.id).await.unwrap(), 1);
    assert_eq!(
        storage.download_status(&cid).unwrap().unwrap().phase,
        DownloadPhase::Completed
    );
    assert_eq!(a.node.check_for_missing_files(&community.id).await.unwrap(), 0);
}
