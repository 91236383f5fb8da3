#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hearth_net::{MemoryHub, NetworkEvent, PubSub};
use hearth_node::{Node, Storage, StorageOptions};
use hearth_shared::certificate::{
    issue_csr_with_identity, sign_certificate, HashAlgorithm, RootCa, SignAlgorithm, Subject,
};
use hearth_shared::types::CommunityId;
use hearth_shared::{Community, Identity};
use hearth_store::BlockStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const COMMUNITY: &str = "hearth-test";

pub fn root_ca() -> RootCa {
    RootCa::generate(
        COMMUNITY,
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        Utc::now() + chrono::Duration::days(3650),
    )
    .unwrap()
}

pub fn certify_between(
    root: &RootCa,
    identity: &Identity,
    nickname: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> String {
    let csr = issue_csr_with_identity(
        Subject {
            nickname: nickname.into(),
            common_name: format!("{nickname}.onion"),
            peer_id: format!("peer-{nickname}"),
            dm_public_key: "dm".into(),
        },
        identity,
        SignAlgorithm::Ed25519,
        HashAlgorithm::Sha256,
    )
    .unwrap();
    sign_certificate(&root.certificate, &root.private_key, &csr.pem, not_before, not_after)
        .unwrap()
}

pub fn certify(root: &RootCa, identity: &Identity, nickname: &str) -> String {
    let now = Utc::now();
    certify_between(
        root,
        identity,
        nickname,
        now - chrono::Duration::minutes(1),
        now + chrono::Duration::days(30),
    )
}

pub fn options() -> StorageOptions {
    StorageOptions {
        auto_download: false,
        reconcile_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        ..StorageOptions::default()
    }
}

pub fn community(root: &RootCa) -> Community {
    let mut community = Community::new(CommunityId::new(COMMUNITY), "Hearth test");
    community.root_ca = root.certificate.clone();
    community
}

/// One storage on its own hub, with inbound traffic discarded.
pub async fn single_storage(dir: &TempDir, options: StorageOptions) -> Arc<Storage> {
    let hub = MemoryHub::new();
    let (transport, _events) = hub.join("solo");
    let storage = Arc::new(Storage::new(
        dir.path().join(COMMUNITY),
        Arc::new(transport),
        CommunityId::new(COMMUNITY),
        options,
    ));
    storage.initialize().await.unwrap();
    storage
}

/// A node joined to `hub` with its router running.
pub struct Peer {
    pub node: Arc<Node>,
    pub transport: Arc<dyn PubSub>,
    pub router: tokio::task::JoinHandle<()>,
}

pub fn peer(
    hub: &MemoryHub,
    name: &str,
    dir: &TempDir,
    options: StorageOptions,
    blocks: Option<Arc<dyn BlockStore>>,
) -> Peer {
    let (transport, events): (_, mpsc::Receiver<NetworkEvent>) = hub.join(name);
    let transport: Arc<dyn PubSub> = Arc::new(transport);
    let mut node = Node::new(dir.path().join(name), options, Arc::clone(&transport));
    if let Some(blocks) = blocks {
        node = node.with_block_store(blocks);
    }
    let node = Arc::new(node);
    let router = node.spawn(events);
    Peer {
        node,
        transport,
        router,
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
