//! Direct-message key material and envelopes.
//!
//! A DM user announces a long-term X25519 key (version-prefixed, 66 hex
//! chars) together with a half key (64 hex chars). A peer opening a
//! conversation contributes its own half key, derives the shared secret and
//! seals a random conversation phrase for the recipient. Direct messages are
//! then encrypted with a key derived from that phrase and padded so that no
//! valid payload is shorter than [`MIN_DIRECT_MESSAGE_LEN`] base64 chars.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_CONVERSATION_KEY, MIN_DIRECT_MESSAGE_LEN};
use crate::crypto::{self, SymmetricKey};
use crate::error::CryptoError;

/// Prefix marking the key format of an announced DM public key.
pub const DM_KEY_VERSION: &str = "01";

/// Framed plaintext is padded up to this many bytes before encryption.
const DM_PADDED_LEN: usize = 240;

#[derive(Clone)]
pub struct DmKeys {
    secret: StaticSecret,
}

impl DmKeys {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self {
            secret: StaticSecret::from(arr),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// Raw X25519 public key, 64 hex chars. Used as half key and as
    /// conversation key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(PublicKey::from(&self.secret).as_bytes())
    }

    /// Version-prefixed public key announced in the DM user directory.
    pub fn announce_key(&self) -> String {
        format!("{DM_KEY_VERSION}{}", self.public_key_hex())
    }

    /// Derive the symmetric conversation key shared with `their_public_hex`.
    pub fn shared_key(&self, their_public_hex: &str) -> Result<SymmetricKey, CryptoError> {
        let their_public = parse_public(their_public_hex)?;
        let shared = self.secret.diffie_hellman(&their_public);
        Ok(crypto::derive_key(
            KDF_CONTEXT_CONVERSATION_KEY,
            shared.as_bytes(),
        ))
    }
}

fn parse_public(hex_key: &str) -> Result<PublicKey, CryptoError> {
    let raw = hex_key.strip_prefix(DM_KEY_VERSION).filter(|k| k.len() == 64);
    let raw = raw.unwrap_or(hex_key);
    let bytes = hex::decode(raw).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(PublicKey::from(arr))
}

/// Seal a conversation phrase for the owner of `recipient_half_key`.
/// Returns the base64 envelope stored in the conversation directory.
pub fn seal_conversation(
    initiator: &DmKeys,
    recipient_half_key: &str,
    phrase: &[u8],
) -> Result<String, CryptoError> {
    let key = initiator.shared_key(recipient_half_key)?;
    crypto::encrypt_to_base64(&key, phrase)
}

/// Open an envelope produced by [`seal_conversation`].
pub fn open_conversation(
    recipient: &DmKeys,
    initiator_public: &str,
    envelope: &str,
) -> Result<Vec<u8>, CryptoError> {
    let key = recipient.shared_key(initiator_public)?;
    crypto::decrypt_from_base64(&key, envelope)
}

fn phrase_key(phrase: &[u8]) -> SymmetricKey {
    crypto::derive_key(KDF_CONTEXT_CONVERSATION_KEY, phrase)
}

/// Encrypt a direct message under a conversation phrase.
pub fn seal_direct_message(phrase: &[u8], text: &str) -> Result<String, CryptoError> {
    let body = text.as_bytes();
    let len = u32::try_from(body.len()).map_err(|_| CryptoError::EncryptionFailed)?;

    let mut framed = Vec::with_capacity(DM_PADDED_LEN.max(4 + body.len()));
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(body);
    if framed.len() < DM_PADDED_LEN {
        framed.resize(DM_PADDED_LEN, 0);
    }

    let sealed = crypto::encrypt_to_base64(&phrase_key(phrase), &framed)?;
    debug_assert!(sealed.len() >= MIN_DIRECT_MESSAGE_LEN);
    Ok(sealed)
}

pub fn open_direct_message(phrase: &[u8], payload: &str) -> Result<String, CryptoError> {
    let framed = crypto::decrypt_from_base64(&phrase_key(phrase), payload)?;
    if framed.len() < 4 {
        return Err(CryptoError::DecryptionFailed);
    }
    let (len_bytes, rest) = framed.split_at(4);
    let mut len_arr = [0u8; 4];
    len_arr.copy_from_slice(len_bytes);
    let len = u32::from_le_bytes(len_arr) as usize;
    let body = rest.get(..len).ok_or(CryptoError::DecryptionFailed)?;
    String::from_utf8(body.to_vec()).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Base64 check used by the DM validators. Requires canonical padding.
pub fn is_base64(s: &str) -> bool {
    !s.is_empty() && s.len() % 4 == 0 && STANDARD.decode(s).is_ok()
}
