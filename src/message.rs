//! # Command messages delivered through the messages path.
//!
//! A [`Message`] is the payload of one child node under
//! `/<RunId>/messages`; the lexical order of the child names defines
//! delivery order. `SYSTEM/stop` is the only built-in command and is
//! handled by the supervisor itself, never forwarded to the worker.
//!
//! ## Wire format
//! ```text
//! {"type":"SYSTEM","command":"stop"}
//! {"type":"USER","command":"reload","payload":"aGVsbG8="}
//! ```
//!
//! The optional payload is a base64-encoded byte string.

use serde::{Deserialize, Serialize};

/// Origin classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Built-in command interpreted by the supervisor.
    System,
    /// Command delivered to the worker's message callback.
    User,
}

/// A single command message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Origin of the message.
    #[serde(rename = "type")]
    kind: MessageType,
    /// Command verb.
    command: String,
    /// Opaque payload bytes, base64 on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    payload: Option<Vec<u8>>,
}

impl Message {
    /// Builds a user message with an optional payload.
    pub fn user(command: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Self {
            kind: MessageType::User,
            command: command.into(),
            payload,
        }
    }

    /// Builds a payload-less system message.
    pub fn system(command: impl Into<String>) -> Self {
        Self {
            kind: MessageType::System,
            command: command.into(),
            payload: None,
        }
    }

    /// Returns the origin of the message.
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Returns the command verb.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the payload bytes, if any.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// True for the built-in `SYSTEM/stop` command.
    pub fn is_stop(&self) -> bool {
        self.kind == MessageType::System && self.command == SystemMessages::STOP_COMMAND
    }

    /// Encodes the message to its JSON byte form.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("message serializes to JSON")
    }

    /// Decodes a JSON byte form; `None` for malformed payloads.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Built-in system commands.
pub struct SystemMessages;

impl SystemMessages {
    /// Command verb that requests a graceful worker stop.
    pub const STOP_COMMAND: &'static str = "stop";

    /// The message that requests a graceful worker stop.
    pub fn stop() -> Message {
        Message::system(Self::STOP_COMMAND)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_str(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            Some(t) => STANDARD
                .decode(t)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_message_wire_form() {
        let bytes = SystemMessages::stop().encode();
        assert_eq!(bytes, br#"{"type":"SYSTEM","command":"stop"}"#);
        assert!(Message::decode(&bytes).expect("decodes").is_stop());
    }

    #[test]
    fn user_message_payload_round_trip() {
        let msg = Message::user("reload", Some(b"hello".to_vec()));
        let text = String::from_utf8(msg.encode()).expect("utf8");
        assert!(text.contains("aGVsbG8="), "payload not base64 in {text}");
        assert_eq!(Message::decode(text.as_bytes()), Some(msg));
    }

    #[test]
    fn user_message_without_payload_omits_field() {
        let msg = Message::user("ping", None);
        let text = String::from_utf8(msg.encode()).expect("utf8");
        assert!(!text.contains("payload"));
        assert!(!Message::decode(text.as_bytes()).expect("decodes").is_stop());
    }

    #[test]
    fn malformed_payload_decodes_to_none() {
        assert_eq!(Message::decode(b"{"), None);
        assert_eq!(Message::decode(br#"{"type":"OTHER","command":"x"}"#), None);
        assert_eq!(Message::decode(br#"{"type":"USER","command":1}"#), None);
    }
}
