mod common;

use common::{community, eventually, options, peer, root_ca};
use hearth_net::MemoryHub;
use hearth_node::EngineError;
use hearth_shared::dm::{open_conversation, seal_conversation, seal_direct_message, DmKeys};
use hearth_store::{Conversation, DirectMessage, DmUser};
use tempfile::TempDir;

#[tokio::test]
async fn test_dm_directory_replicates() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);

    let a = peer(&hub, "peer-a", &dir, options(), None);
    let b = peer(&hub, "peer-b", &dir, options(), None);
    let a_storage = a.node.launch_community(&community).await.unwrap();
    let b_storage = b.node.launch_community(&community).await.unwrap();

    let alice = DmKeys::generate();
    let bob = DmKeys::generate();

    let user = DmUser {
        public_key: alice.announce_key(),
        half_key: alice.public_key_hex(),
    };
    assert!(a_storage.announce_dm_user(user.clone()).await.unwrap().is_accepted());

    let phrase = b"correct horse battery staple";
    let conversation = Conversation {
        public_key: alice.public_key_hex(),
        encrypted_phrase: seal_conversation(&alice, &bob.public_key_hex(), phrase).unwrap(),
    };
    assert!(a_storage
        .announce_conversation(conversation.clone())
        .await
        .unwrap()
        .is_accepted());

    let message = DirectMessage {
        conversation: conversation.public_key.clone(),
        payload: seal_direct_message(phrase, "hi bob").unwrap(),
    };
    assert!(a_storage
        .send_direct_message(message.clone())
        .await
        .unwrap()
        .is_accepted());

    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let conversation = conversation.public_key.clone();
            async move {
                !b_storage.dm_users().await.unwrap().is_empty()
                    && !b_storage.conversations().await.unwrap().is_empty()
                    && !b_storage.direct_messages(&conversation).await.unwrap().is_empty()
            }
        })
        .await
    );
    assert_eq!(b_storage.dm_users().await.unwrap(), vec![user]);
    assert_eq!(b_storage.conversations().await.unwrap(), vec![conversation.clone()]);
    assert_eq!(
        b_storage.direct_messages(&conversation.public_key).await.unwrap(),
        vec![message]
    );

    // the replica can open the phrase addressed to it
    let received = &b_storage.conversations().await.unwrap()[0];
    let opened =
        open_conversation(&bob, &received.public_key, &received.encrypted_phrase).unwrap();
    assert_eq!(opened, phrase);
}

#[tokio::test]
async fn test_short_direct_message_is_refused_everywhere() {
    let dir = TempDir::new().unwrap();
    let hub = MemoryHub::new();
    let root = root_ca();
    let community = community(&root);

    let a = peer(&hub, "peer-a", &dir, options(), None);
    let b = peer(&hub, "peer-b", &dir, options(), None);
    let a_storage = a.node.launch_community(&community).await.unwrap();
    let b_storage = b.node.launch_community(&community).await.unwrap();
    let conversation = DmKeys::generate().public_key_hex();

    let short = DirectMessage {
        conversation: conversation.clone(),
        payload: "A".repeat(363),
    };
    let err = a_storage.send_direct_message(short).await.unwrap_err();
    assert!(matches!(err, EngineError::SchemaInvalid(_)));
    assert!(a_storage.direct_messages(&conversation).await.unwrap().is_empty());

    // the shortest accepted payload goes through and replicates
    let floor = DirectMessage {
        conversation: conversation.clone(),
        payload: "A".repeat(364),
    };
    assert!(a_storage.send_direct_message(floor.clone()).await.unwrap().is_accepted());
    assert!(
        eventually(|| {
            let b_storage = b_storage.clone();
            let conversation = conversation.clone();
            async move { !b_storage.direct_messages(&conversation).await.unwrap().is_empty() }
        })
        .await
    );
    assert_eq!(
        b_storage.direct_messages(&conversation).await.unwrap(),
        vec![floor]
    );
}
