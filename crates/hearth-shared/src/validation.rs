//! Shape and signature checks for inbound peer objects.
//!
//! Everything here is pure: a candidate goes in, a verdict comes out, and
//! the only side effect is a log line on rejection. Schema checks run before
//! any signature or storage work so malformed input is dropped cheaply.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::channel::PublicChannel;
use crate::constants::{
    CONVERSATION_PUBKEY_HEX_LEN, DM_HALF_KEY_HEX_LEN, DM_USER_PUBKEY_HEX_LEN,
    MIN_DIRECT_MESSAGE_LEN,
};
use crate::dm::is_base64;
use crate::error::{IdentityError, SchemaError};
use crate::identity::verify_signature_hex;
use crate::message::ChannelMessage;

const MESSAGE_FIELDS: &[&str] = &[
    "id",
    "type",
    "message",
    "media",
    "createdAt",
    "channelAddress",
    "signature",
    "pubKey",
];
const MEDIA_FIELDS: &[&str] = &["path", "name", "ext", "cid", "message", "size"];
const MEDIA_MESSAGE_FIELDS: &[&str] = &["id", "channelAddress"];
const CHANNEL_FIELDS: &[&str] = &["name", "description", "owner", "timestamp", "address"];

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// DM directory entry: 66-hex-char public key plus 64-hex-char half key.
pub fn validate_user(public_key: &str, half_key: &str) -> bool {
    let ok = is_hex_of_len(public_key, DM_USER_PUBKEY_HEX_LEN)
        && is_hex_of_len(half_key, DM_HALF_KEY_HEX_LEN);
    if !ok {
        debug!(public_key, "Rejected DM user entry");
    }
    ok
}

/// Conversation entry: 64-hex-char public key plus a base64 envelope.
pub fn validate_conversation_key(public_key: &str, encrypted_phrase: &str) -> bool {
    let ok = is_hex_of_len(public_key, CONVERSATION_PUBKEY_HEX_LEN) && is_base64(encrypted_phrase);
    if !ok {
        debug!(public_key, "Rejected conversation entry");
    }
    ok
}

pub fn validate_direct_message(payload: &str) -> bool {
    let ok = payload.len() >= MIN_DIRECT_MESSAGE_LEN && is_base64(payload);
    if !ok {
        debug!(len = payload.len(), "Rejected direct message payload");
    }
    ok
}

/// Structural check of a channel message. Returns the typed message on
/// success, or the first violation found.
pub fn validate_message(value: &Value) -> Result<ChannelMessage, SchemaError> {
    let result = check_message(value).and_then(|()| {
        serde_json::from_value::<ChannelMessage>(value.clone())
            .map_err(|e| SchemaError::WrongType {
                field: e.to_string(),
                expected: "a channel message",
            })
    });
    if let Err(e) = &result {
        warn!(error = %e, "Invalid message");
    }
    result
}

pub fn validate_channel(value: &Value) -> Result<PublicChannel, SchemaError> {
    let result = check_channel(value).and_then(|()| {
        serde_json::from_value::<PublicChannel>(value.clone())
            .map_err(|e| SchemaError::WrongType {
                field: e.to_string(),
                expected: "a channel",
            })
    });
    if let Err(e) = &result {
        debug!(error = %e, "Invalid channel");
    }
    result
}

/// Check `message.signature` against `message.pub_key`.
pub fn verify_message_signature(message: &ChannelMessage) -> Result<(), IdentityError> {
    verify_signature_hex(&message.pub_key, &message.signing_bytes(), &message.signature)
}

fn check_message(value: &Value) -> Result<(), SchemaError> {
    let obj = Fields::new(value, "value", MESSAGE_FIELDS)?;
    obj.non_empty_string("id")?;
    obj.positive_integer("type")?;
    obj.string_or_binary("message")?;
    if let Some(media) = obj.optional_object("media")? {
        check_media(media)?;
    }
    obj.number("createdAt")?;
    obj.non_empty_string("channelAddress")?;
    obj.non_empty_string("signature")?;
    obj.non_empty_string("pubKey")?;
    Ok(())
}

fn check_media(value: &Value) -> Result<(), SchemaError> {
    let media = Fields::new(value, "media", MEDIA_FIELDS)?;
    media.nullable_string("path")?;
    media.non_empty_string("name")?;
    media.non_empty_string("ext")?;
    media.non_empty_string("cid")?;
    media.optional_unsigned("size")?;
    if let Some(reference) = media.optional_object("message")? {
        let reference = Fields::new(reference, "media.message", MEDIA_MESSAGE_FIELDS)?;
        reference.non_empty_string("id")?;
        reference.non_empty_string("channelAddress")?;
    }
    Ok(())
}

fn check_channel(value: &Value) -> Result<(), SchemaError> {
    let obj = Fields::new(value, "value", CHANNEL_FIELDS)?;
    obj.non_empty_string("name")?;
    obj.non_empty_string("description")?;
    obj.non_empty_string("owner")?;
    obj.number("timestamp")?;
    obj.non_empty_string("address")?;
    Ok(())
}

/// Accessor over one JSON object that reports violations by dotted path.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    prefix: &'a str,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value, prefix: &'a str, allowed: &[&str]) -> Result<Self, SchemaError> {
        let map = value
            .as_object()
            .ok_or_else(|| SchemaError::NotAnObject(prefix.to_string()))?;
        let fields = Self { map, prefix };
        if let Some(unknown) = map.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(SchemaError::Unknown(fields.path(unknown)));
        }
        Ok(fields)
    }

    fn path(&self, key: &str) -> String {
        if self.prefix == "value" {
            key.to_string()
        } else {
            format!("{}.{key}", self.prefix)
        }
    }

    fn present(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn required(&self, key: &str) -> Result<&'a Value, SchemaError> {
        self.present(key)
            .ok_or_else(|| SchemaError::Missing(self.path(key)))
    }

    fn wrong(&self, key: &str, expected: &'static str) -> SchemaError {
        SchemaError::WrongType {
            field: self.path(key),
            expected,
        }
    }

    fn non_empty_string(&self, key: &str) -> Result<(), SchemaError> {
        match self.required(key)? {
            Value::String(s) if s.is_empty() => Err(SchemaError::Empty(self.path(key))),
            Value::String(_) => Ok(()),
            _ => Err(self.wrong(key, "a string")),
        }
    }

    fn nullable_string(&self, key: &str) -> Result<(), SchemaError> {
        match self.map.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
            Some(_) => Err(self.wrong(key, "a string")),
        }
    }

    fn integer(&self, key: &str) -> Result<i64, SchemaError> {
        self.required(key)?
            .as_i64()
            .ok_or_else(|| self.wrong(key, "an integer"))
    }

    fn number(&self, key: &str) -> Result<(), SchemaError> {
        match self.required(key)? {
            Value::Number(_) => Ok(()),
            _ => Err(self.wrong(key, "a number")),
        }
    }

    fn positive_integer(&self, key: &str) -> Result<(), SchemaError> {
        match self.integer(key)? {
            n if n > 0 => Ok(()),
            _ => Err(self.wrong(key, "a positive number")),
        }
    }

    fn optional_unsigned(&self, key: &str) -> Result<(), SchemaError> {
        match self.present(key) {
            None => Ok(()),
            Some(v) if v.is_u64() => Ok(()),
            Some(_) => Err(self.wrong(key, "a non-negative integer")),
        }
    }

    fn string_or_binary(&self, key: &str) -> Result<(), SchemaError> {
        match self.required(key)? {
            Value::String(_) => Ok(()),
            Value::Array(items) if items.iter().all(is_byte) => Ok(()),
            _ => Err(self.wrong(key, "a string or binary")),
        }
    }

    fn optional_object(&self, key: &str) -> Result<Option<&'a Value>, SchemaError> {
        match self.present(key) {
            None => Ok(None),
            Some(v) if v.is_object() => Ok(Some(v)),
            Some(_) => Err(self.wrong(key, "of type object")),
        }
    }
}

fn is_byte(v: &Value) -> bool {
    v.as_u64().map_or(false, |n| n <= u8::MAX as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::message::{MessageBody, MessageType};
    use crate::types::ChannelAddress;
    use serde_json::json;

    fn valid_message() -> Value {
        json!({
            "id": "id",
            "type": 1,
            "message": "message",
            "createdAt": 1_000_000,
            "channelAddress": "general",
            "signature": "aa",
            "pubKey": "bb"
        })
    }

    #[test]
    fn test_validate_user() {
        let pub_key = "a".repeat(66);
        let half = "0123456789abcdef".repeat(4);
        assert!(validate_user(&pub_key, &half));
        assert!(!validate_user(&"a".repeat(65), &half));
        assert!(!validate_user(&pub_key, &"a".repeat(63)));
        assert!(!validate_user(&format!("{}g", "a".repeat(65)), &half));
        assert!(!validate_user(&pub_key, &format!("{}z", "a".repeat(63))));
    }

    #[test]
    fn test_validate_conversation_key() {
        let key = "f".repeat(64);
        assert!(validate_conversation_key(&key, "aGVsbG8="));
        assert!(!validate_conversation_key(&"f".repeat(66), "aGVsbG8="));
        assert!(!validate_conversation_key(&key, "not base64!"));
    }

    #[test]
    fn test_validate_direct_message_length_floor() {
        assert!(validate_direct_message(&"A".repeat(364)));
        assert!(validate_direct_message(&"A".repeat(368)));
        assert!(!validate_direct_message(&"A".repeat(363)));
        assert!(!validate_direct_message(&format!("{}==", "A".repeat(358))));
        assert!(!validate_direct_message(&"*".repeat(400)));
    }

    #[test]
    fn test_valid_message_passes() {
        let msg = validate_message(&valid_message()).unwrap();
        assert_eq!(msg.id, "id");
        assert_eq!(msg.message, MessageBody::Text("message".into()));
    }

    #[test]
    fn test_binary_message_passes() {
        let mut value = valid_message();
        value["message"] = json!([0, 1, 255]);
        assert!(validate_message(&value).is_ok());
        value["message"] = json!([0, 256]);
        assert!(validate_message(&value).is_err());
    }

    #[test]
    fn test_message_rejections() {
        let mut value = valid_message();
        value["type"] = json!(-1);
        assert!(matches!(
            validate_message(&value),
            Err(SchemaError::WrongType { .. })
        ));

        let mut value = valid_message();
        value["type"] = json!(1.5);
        assert!(validate_message(&value).is_err());

        let mut value = valid_message();
        value["id"] = json!("");
        assert_eq!(validate_message(&value), Err(SchemaError::Empty("id".into())));

        let mut value = valid_message();
        value.as_object_mut().unwrap().remove("pubKey");
        assert_eq!(
            validate_message(&value),
            Err(SchemaError::Missing("pubKey".into()))
        );

        let mut value = valid_message();
        value["extra"] = json!(true);
        assert_eq!(validate_message(&value), Err(SchemaError::Unknown("extra".into())));

        let mut value = valid_message();
        value["createdAt"] = json!(1_620_000_000.123);
        let msg = validate_message(&value).unwrap();
        assert_eq!(msg.created_at.canonical(), "1620000000.123");

        let mut value = valid_message();
        value["createdAt"] = json!("yesterday");
        assert!(validate_message(&value).is_err());

        assert_eq!(
            validate_message(&json!("nope")),
            Err(SchemaError::NotAnObject("value".into()))
        );
    }

    #[test]
    fn test_media_schema() {
        let mut value = valid_message();
        value["media"] = json!({
            "path": null,
            "name": "photo",
            "ext": ".png",
            "cid": "abc",
            "message": { "id": "id", "channelAddress": "general" }
        });
        assert!(validate_message(&value).is_ok());

        value["media"]["message"] = json!({ "id": "id" });
        assert_eq!(
            validate_message(&value),
            Err(SchemaError::Missing("media.message.channelAddress".into()))
        );

        value["media"] = json!({ "name": "photo", "cid": "abc" });
        assert_eq!(
            validate_message(&value),
            Err(SchemaError::Missing("media.ext".into()))
        );
    }

    #[test]
    fn test_validate_channel() {
        let value = json!({
            "name": "general",
            "description": "stuff",
            "owner": "owner",
            "timestamp": 666_999_666,
            "address": "general"
        });
        let channel = validate_channel(&value).unwrap();
        assert_eq!(channel.address, ChannelAddress::new("general"));

        let mut missing = value.clone();
        missing.as_object_mut().unwrap().remove("owner");
        assert_eq!(validate_channel(&missing), Err(SchemaError::Missing("owner".into())));

        let mut fractional = value.clone();
        fractional["timestamp"] = json!(666_999_666.5);
        assert!(validate_channel(&fractional).is_ok());

        let mut bad = value;
        bad["timestamp"] = json!("now");
        assert!(validate_channel(&bad).is_err());
    }

    #[test]
    fn test_signature_check() {
        let identity = Identity::generate();
        let mut msg = ChannelMessage::new_signed(
            &identity,
            ChannelAddress::new("general"),
            MessageType::Basic,
            "hello".into(),
            None,
        );
        assert!(verify_message_signature(&msg).is_ok());

        msg.message = "tampered".into();
        assert!(verify_message_signature(&msg).is_err());
    }
}
