use serde::{Deserialize, Serialize};

use crate::constants::KDF_CONTEXT_CHANNEL_ADDRESS;
use crate::types::{ChannelAddress, Timestamp};

/// A public channel descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicChannel {
    pub name: String,
    pub description: String,
    /// Identifier of the founding member.
    pub owner: String,
    /// Unix seconds, possibly fractional.
    pub timestamp: Timestamp,
    pub address: ChannelAddress,
}

impl PublicChannel {
    /// Create a channel descriptor; the address is derived, never chosen.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        owner: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        let name = name.into();
        let owner = owner.into();
        let address = Self::derive_address(&owner, &name, &timestamp);
        Self {
            name,
            description: description.into(),
            owner,
            timestamp,
            address,
        }
    }

    /// Deterministic address: same owner, name and timestamp always map to
    /// the same address on every replica.
    pub fn derive_address(owner: &str, name: &str, timestamp: &Timestamp) -> ChannelAddress {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CHANNEL_ADDRESS);
        hasher.update(owner.as_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(timestamp.canonical().as_bytes());
        let hex = hasher.finalize().to_hex();
        ChannelAddress(hex[..32].to_string())
    }
}
