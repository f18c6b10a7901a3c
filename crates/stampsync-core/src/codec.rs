//! Flat key-value payload codec and wire framing
//!
//! Every payload on the wire is a flat string-keyed JSON map. Requests carry
//! a mandatory `action` discriminator; replies, context pushes and direct
//! pushes do not.
//!
//! ## Wire Format
//!
//! Transports that move bytes frame each payload in a [`WireMessage`]:
//!
//! ```text
//! {"request_id": 7, "payload": {"action": "requestButtons"}}     request
//! {"reply_to": 7, "payload": {"buttons": [...]}}                 reply
//! {"payload": {"currentTime": "12:00:01"}}                       direct push
//! ```
//!
//! Decoding never panics. Callers drop invalid payloads with a debug log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::protocol::fields;

/// A flat string-keyed payload
pub type Payload = serde_json::Map<String, Value>;

/// Build a payload with the `action` discriminator plus action-specific fields.
///
/// A field named `action` in `extra` is overwritten by the discriminator.
pub fn encode(action: &str, extra: Payload) -> Payload {
    let mut payload = extra;
    payload.insert(fields::ACTION.into(), Value::String(action.to_string()));
    payload
}

/// Split a payload into its action name and the remaining fields.
///
/// Fails with [`SyncError::DecodeInvalid`] when `action` is missing or not a
/// string. Field-level validation belongs to the typed decoders in
/// [`crate::protocol`].
pub fn decode(payload: &Payload) -> SyncResult<(String, Payload)> {
    let action = match payload.get(fields::ACTION) {
        Some(Value::String(action)) => action.clone(),
        Some(other) => {
            return Err(SyncError::DecodeInvalid(format!(
                "action must be a string, got {}",
                other
            )))
        }
        None => return Err(SyncError::DecodeInvalid("missing action".to_string())),
    };

    let mut rest = payload.clone();
    rest.remove(fields::ACTION);
    Ok((action, rest))
}

/// Read a required string field
pub fn require_str<'a>(payload: &'a Payload, key: &str) -> SyncResult<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::DecodeInvalid(format!("missing or non-string field `{}`", key)))
}

/// Read an optional string field, ignoring wrong-typed values
pub fn optional_str<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Read an optional bool field, ignoring wrong-typed values
pub fn optional_bool(payload: &Payload, key: &str) -> Option<bool> {
    payload.get(key).and_then(Value::as_bool)
}

/// Framed message as moved by byte-oriented transports
///
/// Correlation is explicit: a request carries a `request_id`, its reply
/// carries the same id in `reply_to`. Messages with neither are direct
/// pushes that expect no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    pub payload: Payload,
}

impl WireMessage {
    /// A request expecting exactly one reply
    pub fn request(request_id: u64, payload: Payload) -> Self {
        Self {
            request_id: Some(request_id),
            reply_to: None,
            payload,
        }
    }

    /// The reply to a previously received request
    pub fn reply(reply_to: u64, payload: Payload) -> Self {
        Self {
            request_id: None,
            reply_to: Some(reply_to),
            payload,
        }
    }

    /// A message that expects no reply
    pub fn direct(payload: Payload) -> Self {
        Self {
            request_id: None,
            reply_to: None,
            payload,
        }
    }

    /// Encode to JSON bytes
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn from_bytes(data: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_encode_adds_action() {
        let payload = encode("captureEvent", map(json!({"buttonName": "X", "color": "red"})));
        assert_eq!(payload.get("action"), Some(&json!("captureEvent")));
        assert_eq!(payload.get("buttonName"), Some(&json!("X")));
    }

    #[test]
    fn test_encode_discriminator_wins() {
        let payload = encode("requestButtons", map(json!({"action": "spoofed"})));
        assert_eq!(payload.get("action"), Some(&json!("requestButtons")));
    }

    #[test]
    fn test_decode_splits_action() {
        let (action, rest) = decode(&map(json!({"action": "captureEvent", "color": "red"}))).unwrap();
        assert_eq!(action, "captureEvent");
        assert!(!rest.contains_key("action"));
        assert_eq!(rest.get("color"), Some(&json!("red")));
    }

    #[test]
    fn test_decode_missing_action_is_invalid() {
        let err = decode(&map(json!({"buttonName": "X"}))).unwrap_err();
        assert!(matches!(err, SyncError::DecodeInvalid(_)));
    }

    #[test]
    fn test_decode_wrong_typed_action_is_invalid() {
        let err = decode(&map(json!({"action": 3}))).unwrap_err();
        assert!(matches!(err, SyncError::DecodeInvalid(_)));
    }

    #[test]
    fn test_require_str() {
        let payload = map(json!({"name": "Coffee", "count": 2}));
        assert_eq!(require_str(&payload, "name").unwrap(), "Coffee");
        assert!(require_str(&payload, "count").is_err());
        assert!(require_str(&payload, "missing").is_err());
    }

    #[test]
    fn test_wire_message_bytes() {
        let msg = WireMessage::request(7, map(json!({"action": "requestButtons"})));
        let decoded = WireMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.reply_to, None);
    }

    #[test]
    fn test_wire_message_omits_absent_ids() {
        let bytes = WireMessage::direct(map(json!({"currentTime": "1"}))).to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("request_id"));
        assert!(!text.contains("reply_to"));
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(WireMessage::from_bytes(b"\x00\x01garbage").is_err());
        assert!(WireMessage::from_bytes(br#"{"reply_to": 1}"#).is_err());
    }
}
