//! Inbound side of the pub/sub transport.
//!
//! Every envelope from a peer is decoded and handed to the log store, which
//! decides whether it is accepted. Nothing here returns errors to the
//! sender: malformed or rejected input is logged and dropped.

use std::sync::Arc;

use hearth_shared::protocol::PeerMessage;
use hearth_shared::types::{ChannelAddress, CommunityId};
use hearth_store::{AppendOutcome, Conversation, DirectMessage, DmUser};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::Storage;

/// Community a topic belongs to: `community:<id>` or
/// `channel:<id>/<address>`.
pub fn community_of_topic(topic: &str) -> Option<CommunityId> {
    if let Some(id) = topic.strip_prefix("community:") {
        return (!id.is_empty()).then(|| CommunityId::new(id));
    }
    let (id, address) = topic.strip_prefix("channel:")?.split_once('/')?;
    (!id.is_empty() && !address.is_empty()).then(|| CommunityId::new(id))
}

fn log_outcome(kind: &'static str, outcome: &AppendOutcome) {
    match outcome {
        AppendOutcome::Accepted => debug!(kind, "Peer entry accepted"),
        AppendOutcome::Duplicate => debug!(kind, "Peer entry already known"),
        AppendOutcome::Rejected(reason) => warn!(kind, %reason, "Peer entry rejected"),
    }
}

impl Storage {
    /// Process one pub/sub message addressed to this community.
    pub async fn handle_network_message(
        self: &Arc<Self>,
        source: Option<&str>,
        topic: &str,
        data: &[u8],
    ) {
        let local = self.local_peer_id();
        if source == Some(local.as_str()) {
            return;
        }

        let envelope = match PeerMessage::from_bytes(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic, ?source, error = %e, "Dropping undecodable peer message");
                return;
            }
        };

        let kind = envelope.kind();
        debug!(topic, kind, ?source, "Peer message received");
        if let Err(e) = self.dispatch(envelope, &local).await {
            warn!(topic, kind, error = %e, "Failed to process peer message");
        }
    }

    async fn dispatch(self: &Arc<Self>, envelope: PeerMessage, local: &str) -> Result<()> {
        let store = self.store()?;
        match envelope {
            PeerMessage::ChannelAnnounced { channel } => {
                let outcome = store.append_channel_value(&channel).await?;
                log_outcome("channel", &outcome);
                if outcome.is_accepted() {
                    if let Some(address) = channel.get("address").and_then(Value::as_str) {
                        self.subscribe_to_channel(&ChannelAddress::new(address))
                            .await?;
                    }
                }
            }

            PeerMessage::MessagePosted { message } => {
                log_outcome("message", &store.append_message_value(&message).await?);
            }

            PeerMessage::CertificateAdded { certificate } => {
                log_outcome("certificate", &store.append_certificate(&certificate).await?);
            }

            PeerMessage::ChannelMessagesIds {
                ids,
                peer_id,
                channel_address,
                community_id,
            } => {
                if peer_id == local || community_id != *self.community_id() {
                    return Ok(());
                }
                let storage = Arc::clone(self);
                tokio::spawn(async move {
                    match storage
                        .reconcile_missing_messages(&ids, &peer_id, &channel_address, &community_id)
                        .await
                    {
                        Ok(report) if report.requested > 0 => {
                            info!(peer = %peer_id, accepted = report.accepted, "Caught up from peer")
                        }
                        Ok(_) => {}
                        Err(e) => warn!(peer = %peer_id, error = %e, "Reconciliation failed"),
                    }
                });
            }

            PeerMessage::AskForMessages {
                request_id,
                ids,
                peer_id,
                target_peer,
                channel_address,
                community_id,
            } => {
                if target_peer != local || community_id != *self.community_id() {
                    return Ok(());
                }
                self.answer_message_request(&request_id, &ids, &peer_id, &channel_address)
                    .await?;
            }

            PeerMessage::MessagesResponse {
                request_id,
                target_peer,
                messages,
                ..
            } => {
                if target_peer != local {
                    return Ok(());
                }
                if let Some(unclaimed) = self.reconciler.complete(&request_id, messages) {
                    debug!(request_id = %request_id, count = unclaimed.len(), "Ingesting late message response");
                    for message in &unclaimed {
                        log_outcome("message", &store.append_message_value(message).await?);
                    }
                }
            }

            PeerMessage::FileHosted { mut metadata } => {
                // a sender's local path means nothing here
                metadata.path = None;
                log_outcome("file", &store.append_file(&metadata).await?);
            }

            PeerMessage::DmUserAnnounced {
                public_key,
                half_key,
            } => {
                let user = DmUser {
                    public_key,
                    half_key,
                };
                log_outcome("dm_user", &store.append_dm_user(user).await?);
            }

            PeerMessage::ConversationAnnounced {
                public_key,
                encrypted_phrase,
            } => {
                let conversation = Conversation {
                    public_key,
                    encrypted_phrase,
                };
                log_outcome("conversation", &store.append_conversation(conversation).await?);
            }

            PeerMessage::DirectMessagePosted {
                conversation,
                payload,
            } => {
                let message = DirectMessage {
                    conversation,
                    payload,
                };
                log_outcome("direct_message", &store.append_direct_message(message).await?);
            }
        }
        Ok(())
    }
}
