use std::path::PathBuf;

use hearth_net::NetError;
use hearth_shared::error::CertificateError;
use hearth_shared::protocol::ProtocolError;
use hearth_shared::types::{Cid, CommunityId};
use hearth_store::{Rejection, StoreError};
use thiserror::Error;

/// Errors surfaced by the engine to its callers.
///
/// Hostile or malformed peer input never reaches this type; it is dropped
/// and logged by the inbound bridge. Only locally initiated operations
/// report these.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("Signature does not verify")]
    SignatureInvalid,

    #[error("Certificate expired: {0}")]
    CertificateExpired(String),

    #[error("Certificate invalid: {0}")]
    CertificateInvalid(String),

    #[error("Username {0:?} is already taken")]
    UsernameTaken(String),

    /// Fetched bytes did not hash to the requested content id.
    #[error("Content does not match {0}")]
    ContentMismatch(Cid),

    /// Persistence path is not usable. Fatal to the community's startup.
    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("Peer {0} did not respond in time")]
    PeerUnresponsive(String),

    #[error("Storage is not initialized")]
    NotInitialized,

    #[error("Community {0} is not launched on this node")]
    UnknownCommunity(CommunityId),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CertificateError> for EngineError {
    fn from(e: CertificateError) -> Self {
        match e {
            CertificateError::Expired(_) => EngineError::CertificateExpired(e.to_string()),
            other => EngineError::CertificateInvalid(other.to_string()),
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Signature => EngineError::SignatureInvalid,
            Rejection::Certificate(e) => e.into(),
            Rejection::UsernameTaken(name) => EngineError::UsernameTaken(name),
            Rejection::UnknownAuthor => {
                EngineError::CertificateInvalid(Rejection::UnknownAuthor.to_string())
            }
            other => EngineError::SchemaInvalid(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_shared::error::SchemaError;

    #[test]
    fn test_rejections_map_to_taxonomy() {
        assert!(matches!(
            EngineError::from(Rejection::Schema(SchemaError::Missing("id".into()))),
            EngineError::SchemaInvalid(_)
        ));
        assert!(matches!(
            EngineError::from(Rejection::Signature),
            EngineError::SignatureInvalid
        ));
        assert!(matches!(
            EngineError::from(Rejection::Certificate(CertificateError::Expired(Utc::now()))),
            EngineError::CertificateExpired(_)
        ));
        assert!(matches!(
            EngineError::from(Rejection::Certificate(CertificateError::IssuerMismatch)),
            EngineError::CertificateInvalid(_)
        ));
        assert!(matches!(
            EngineError::from(Rejection::UsernameTaken("bob".into())),
            EngineError::UsernameTaken(n) if n == "bob"
        ));
    }
}
