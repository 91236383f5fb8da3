//! # hearth-shared
//!
//! Domain types, validators and cryptographic primitives shared by every
//! Hearth crate: member identities and certificates, channel and message
//! contracts, direct-message envelopes and the peer protocol.

pub mod certificate;
pub mod channel;
pub mod community;
pub mod constants;
pub mod crypto;
pub mod dm;
pub mod error;
pub mod files;
pub mod identity;
pub mod message;
pub mod protocol;
pub mod types;
pub mod username;
pub mod validation;

pub use channel::PublicChannel;
pub use community::{Community, MemberIdentity, RegistrationState};
pub use files::{DownloadPhase, DownloadStatus, FileContent, FileMetadata, MessageRef};
pub use identity::Identity;
pub use message::{ChannelMessage, MessageBody, MessageType, SendingStatus};
pub use protocol::PeerMessage;
pub use types::{ChannelAddress, Cid, CommunityId, Timestamp, UserId};
