use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::files::FileMetadata;
use crate::identity::Identity;
use crate::types::{ChannelAddress, Timestamp};

/// Known message type codes. Any positive code passes schema validation;
/// unknown codes are carried as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Placeholder rendered while a channel has no messages. Never replicated.
    Empty,
    Basic,
    Image,
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            MessageType::Empty => -1,
            MessageType::Basic => 1,
            MessageType::Image => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(MessageType::Empty),
            1 => Some(MessageType::Basic),
            2 => Some(MessageType::Image),
            _ => None,
        }
    }
}

/// Message payload: text, or a binary blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Binary(Vec<u8>),
}

impl From<&str> for MessageBody {
    fn from(s: &str) -> Self {
        MessageBody::Text(s.to_string())
    }
}

impl From<String> for MessageBody {
    fn from(s: String) -> Self {
        MessageBody::Text(s)
    }
}

/// A signed message in a public channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: i64,
    pub message: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<FileMetadata>,
    /// Unix seconds, possibly fractional.
    pub created_at: Timestamp,
    pub channel_address: ChannelAddress,
    /// Hex-encoded Ed25519 signature over [`ChannelMessage::signing_bytes`].
    pub signature: String,
    /// Hex-encoded Ed25519 public key of the author.
    pub pub_key: String,
}

impl ChannelMessage {
    /// Build and sign a new message authored by `identity`.
    pub fn new_signed(
        identity: &Identity,
        channel_address: ChannelAddress,
        message_type: MessageType,
        message: MessageBody,
        media: Option<FileMetadata>,
    ) -> Self {
        let mut msg = Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.code(),
            message,
            media,
            created_at: Timestamp::now(),
            channel_address,
            signature: String::new(),
            pub_key: identity.public_key_hex(),
        };
        msg.signature = identity.sign_hex(&msg.signing_bytes());
        msg
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }

    /// Canonical bytes covered by the signature. Media is bound by name,
    /// extension and content id; the local path and size are filled in by
    /// each replica and stay outside the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        push_field(&mut out, self.id.as_bytes());
        push_field(&mut out, &self.message_type.to_le_bytes());
        push_field(&mut out, self.channel_address.as_str().as_bytes());
        push_field(&mut out, self.created_at.canonical().as_bytes());
        match &self.message {
            MessageBody::Text(text) => {
                out.push(0);
                push_field(&mut out, text.as_bytes());
            }
            MessageBody::Binary(data) => {
                out.push(1);
                push_field(&mut out, data);
            }
        }
        match &self.media {
            Some(media) => {
                out.push(1);
                push_field(&mut out, media.name.as_bytes());
                push_field(&mut out, media.ext.as_bytes());
                push_field(&mut out, media.cid.as_str().as_bytes());
            }
            None => out.push(0),
        }
        out
    }
}

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendingStatus {
    Pending,
    Sent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::verify_signature_hex;
    use crate::types::Cid;

    #[test]
    fn test_signed_message_verifies() {
        let identity = Identity::generate();
        let msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            "hello".into(),
            None,
        );
        assert_eq!(msg.kind(), Some(MessageType::Basic));
        assert!(verify_signature_hex(&msg.pub_key, &msg.signing_bytes(), &msg.signature).is_ok());
    }

    #[test]
    fn test_media_path_not_covered_by_signature() {
        let identity = Identity::generate();
        let media = FileMetadata::new(Cid::of(b"x"), "photo", ".png");
        let mut msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Image,
            "".into(),
            Some(media),
        );
        let before = msg.signing_bytes();
        if let Some(media) = msg.media.as_mut() {
            media.path = Some("/tmp/photo.png".into());
        }
        assert_eq!(before, msg.signing_bytes());
    }

    #[test]
    fn test_media_name_and_ext_are_signed() {
        let identity = Identity::generate();
        let media = FileMetadata::new(Cid::of(b"x"), "cat", ".png");
        let msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Image,
            "".into(),
            Some(media),
        );

        let mut renamed = msg.clone();
        if let Some(media) = renamed.media.as_mut() {
            media.name = "invoice".into();
        }
        assert!(verify_signature_hex(&renamed.pub_key, &renamed.signing_bytes(), &renamed.signature).is_err());

        let mut retyped = msg.clone();
        if let Some(media) = retyped.media.as_mut() {
            media.ext = ".exe".into();
        }
        assert!(verify_signature_hex(&retyped.pub_key, &retyped.signing_bytes(), &retyped.signature).is_err());
    }

    #[test]
    fn test_fractional_created_at_is_signed_exactly() {
        let identity = Identity::generate();
        let mut msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            "hello".into(),
            None,
        );
        msg.created_at = serde_json::from_str("1620000000.123").unwrap();
        msg.signature = identity.sign_hex(&msg.signing_bytes());

        let wire = serde_json::to_string(&msg).unwrap();
        let received: ChannelMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(received.created_at.canonical(), "1620000000.123");
        assert!(verify_signature_hex(&received.pub_key, &received.signing_bytes(), &received.signature).is_ok());
    }

    #[test]
    fn test_json_shape() {
        let identity = Identity::generate();
        let msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            "hello".into(),
            None,
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["channelAddress"], "general");
        assert!(value.get("media").is_none());
        assert!(value["createdAt"].is_number());
    }

    #[test]
    fn test_binary_body_roundtrip() {
        let body: MessageBody = serde_json::from_str("[1,2,3]").unwrap();
        assert_eq!(body, MessageBody::Binary(vec![1, 2, 3]));
        let body: MessageBody = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(body, MessageBody::Text("hi".into()));
    }
}
