use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_MESSAGE_SIZE;
use crate::files::FileMetadata;
use crate::types::{ChannelAddress, CommunityId};

/// Envelopes exchanged between peers on community and channel topics.
///
/// Channel descriptors and messages travel as raw JSON so the receiver can
/// run schema validation on exactly what the sender put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerMessage {
    ChannelAnnounced {
        channel: Value,
    },
    MessagePosted {
        message: Value,
    },
    CertificateAdded {
        certificate: String,
    },
    /// Advertise every message id known for a channel.
    ChannelMessagesIds {
        ids: Vec<String>,
        peer_id: String,
        channel_address: ChannelAddress,
        community_id: CommunityId,
    },
    AskForMessages {
        request_id: String,
        ids: Vec<String>,
        peer_id: String,
        target_peer: String,
        channel_address: ChannelAddress,
        community_id: CommunityId,
    },
    MessagesResponse {
        request_id: String,
        target_peer: String,
        channel_address: ChannelAddress,
        community_id: CommunityId,
        messages: Vec<Value>,
    },
    FileHosted {
        metadata: FileMetadata,
    },
    DmUserAnnounced {
        public_key: String,
        half_key: String,
    },
    ConversationAnnounced {
        public_key: String,
        encrypted_phrase: String,
    },
    DirectMessagePosted {
        conversation: String,
        payload: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Envelope of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl PeerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        Ok(serde_json::from_slice(data)?)
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::ChannelAnnounced { .. } => "channel_announced",
            PeerMessage::MessagePosted { .. } => "message_posted",
            PeerMessage::CertificateAdded { .. } => "certificate_added",
            PeerMessage::ChannelMessagesIds { .. } => "channel_messages_ids",
            PeerMessage::AskForMessages { .. } => "ask_for_messages",
            PeerMessage::MessagesResponse { .. } => "messages_response",
            PeerMessage::FileHosted { .. } => "file_hosted",
            PeerMessage::DmUserAnnounced { .. } => "dm_user_announced",
            PeerMessage::ConversationAnnounced { .. } => "conversation_announced",
            PeerMessage::DirectMessagePosted { .. } => "direct_message_posted",
        }
    }
}
