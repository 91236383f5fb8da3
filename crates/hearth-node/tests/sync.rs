mod common;

use std::time::Duration;

use common::{certify, community, eventually, options, peer, root_ca};
use hearth_net::MemoryHub;
use hearth_node::{EngineError, StorageOptions};
use hearth_shared::types::{ChannelAddress, CommunityId};
use hearth_shared::Identity;
use tempfile::TempDir;

#[tokio::test]
async fn test_two_replicas_converge_on_general() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);
    let alice = Identity::generate();
    let alice_cert = certify(&root, &alice, "alice");

    // peer a writes while b is still offline
    let a = peer(&hub, "peer-a", &dir, options(), None);
    let a_storage = a.node.launch_community(&community).await.unwrap();
    assert!(a_storage.save_certificate(Some(&alice_cert)).await);
    let general = a_storage
        .create_channel("general", "everything", &alice.public_key_hex())
        .await
        .unwrap();
    for text in ["one", "two", "three"] {
        a_storage
            .send_message(&alice, &general.address, text.into(), None)
            .await
            .unwrap();
    }

    let b = peer(&hub, "peer-b", &dir, options(), None);
    let b_storage = b.node.launch_community(&community).await.unwrap();
    assert!(b_storage.save_certificate(Some(&alice_cert)).await);
    b_storage.subscribe_to_topic(&general).await.unwrap();

    let known = a_storage.store().unwrap().message_ids(&general.address).await;
    b_storage
        .reconcile_missing_messages(&known, "peer-a", &general.address, &community.id)
        .await
        .unwrap();
    let mut held: Vec<String> = b_storage
        .messages(&general.address)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    held.sort();
    let mut expected = known.clone();
    expected.sort();
    assert_eq!(held, expected);

    // once both are on the channel topic new messages arrive directly
    let live = a_storage
        .send_message(&alice, &general.address, "four".into(), None)
        .await
        .unwrap();
    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let id = live.id.clone();
            async move { b_storage.store().unwrap().message(&id).await.is_some() }
        })
        .await
    );

    let report = b_storage
        .reconcile_missing_messages(&known, "peer-a", &general.address, &community.id)
        .await
        .unwrap();
    assert_eq!(report.requested, 0);
}

#[tokio::test]
async fn test_advertised_ids_trigger_catch_up() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);
    let alice = Identity::generate();
    let alice_cert = certify(&root, &alice, "alice");

    let a = peer(&hub, "peer-a", &dir, options(), None);
    let a_storage = a.node.launch_community(&community).await.unwrap();
    assert!(a_storage.save_certificate(Some(&alice_cert)).await);
    let general = a_storage
        .create_channel("general", "", &alice.public_key_hex())
        .await
        .unwrap();
    for text in ["one", "two"] {
        a_storage
            .send_message(&alice, &general.address, text.into(), None)
            .await
            .unwrap();
    }

    let b = peer(&hub, "peer-b", &dir, options(), None);
    let b_storage = b.node.launch_community(&community).await.unwrap();
    assert!(b_storage.save_certificate(Some(&alice_cert)).await);
    b_storage.subscribe_to_topic(&general).await.unwrap();

    assert_eq!(
        a_storage
            .advertise_channel_messages(&general.address)
            .await
            .unwrap(),
        2
    );
    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let address = general.address.clone();
            async move { b_storage.messages(&address).await.unwrap().len() == 2 }
        })
        .await
    );
}

#[tokio::test]
async fn test_certificates_and_channels_replicate() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);

    let a = peer(&hub, "peer-a", &dir, options(), None);
    let b = peer(&hub, "peer-b", &dir, options(), None);
    let a_storage = a.node.launch_community(&community).await.unwrap();
    let b_storage = b.node.launch_community(&community).await.unwrap();

    let bob = Identity::generate();
    assert!(a_storage.save_certificate(Some(&certify(&root, &bob, "bob"))).await);
    let channel = a_storage
        .create_channel("random", "", &bob.public_key_hex())
        .await
        .unwrap();

    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            async move { b_storage.username_exists("bob").await.unwrap() }
        })
        .await
    );
    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let address = channel.address.clone();
            async move { b_storage.is_subscribed(&address) }
        })
        .await
    );
    assert_eq!(b_storage.channels().await.unwrap(), vec![channel]);
}

#[tokio::test]
async fn test_unresponsive_peer_times_out() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);

    let a = peer(
        &hub,
        "peer-a",
        &dir,
        StorageOptions {
            reconcile_timeout: Duration::from_millis(200),
            ..options()
        },
        None,
    );
    let storage = a.node.launch_community(&community).await.unwrap();

    let err = storage
        .reconcile_missing_messages(
            &["m-1".to_string()],
            "peer-gone",
            &ChannelAddress::new("general"),
            &community.id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PeerUnresponsive(p) if p == "peer-gone"));

    let err = storage
        .reconcile_missing_messages(
            &["m-1".to_string()],
            "peer-gone",
            &ChannelAddress::new("general"),
            &CommunityId::new("elsewhere"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownCommunity(_)));
}
