//! Records and outcomes exchanged with the store.

use hearth_shared::certificate::Certificate;
use hearth_shared::error::{CertificateError, SchemaError};
use hearth_shared::types::{ChannelAddress, Cid};
use hearth_shared::{ChannelMessage, FileMetadata, PublicChannel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an inbound entry was not appended.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    #[error("signature does not verify against the claimed public key")]
    Signature,

    /// The author holds no currently valid certificate.
    #[error("author is not a member of this community")]
    UnknownAuthor,

    #[error("certificate rejected: {0}")]
    Certificate(#[from] CertificateError),

    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    /// DM directory entry failed its shape check.
    #[error("invalid direct-message directory entry")]
    InvalidDirectoryEntry,

    /// Media update does not match the referenced message.
    #[error("media does not belong to message {0}")]
    MediaMismatch(String),
}

/// Result of offering one entry to a replicated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    Duplicate,
    Rejected(Rejection),
}

impl AppendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AppendOutcome::Accepted)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AppendOutcome::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Rejection> for AppendOutcome {
    fn from(r: Rejection) -> Self {
        AppendOutcome::Rejected(r)
    }
}

/// A certificate as held in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub fingerprint: String,
    pub pem: String,
    pub certificate: Certificate,
}

impl StoredCertificate {
    pub fn parse(pem: &str) -> Result<Self, CertificateError> {
        let certificate = Certificate::from_pem(pem)?;
        Ok(Self {
            fingerprint: certificate.fingerprint()?,
            pem: pem.trim().to_string(),
            certificate,
        })
    }

    pub fn username(&self) -> &str {
        self.certificate.username()
    }
}

/// Announced direct-message key material of a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmUser {
    pub public_key: String,
    pub half_key: String,
}

/// Sealed conversation phrase addressed to a conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub public_key: String,
    pub encrypted_phrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub conversation: String,
    pub payload: String,
}

impl DirectMessage {
    pub fn digest(&self) -> String {
        blake3::hash(self.payload.as_bytes()).to_hex().to_string()
    }
}

/// Change notifications emitted after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    MessageAppended(ChannelMessage),
    MessageMediaUpdated {
        message_id: String,
        channel_address: ChannelAddress,
        media: FileMetadata,
    },
    ChannelAdded(PublicChannel),
    ChannelUpdated(PublicChannel),
    CertificateAdded {
        username: String,
        public_key: String,
    },
    FileHosted(FileMetadata),
    DmUserAdded(DmUser),
    ConversationAdded(Conversation),
    DirectMessageAdded(DirectMessage),
}

/// A hosted-file metadata entry keyed by content id.
pub(crate) fn file_key(cid: &Cid) -> String {
    cid.as_str().to_string()
}
