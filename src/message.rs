//! Message envelope codec
//!
//! Every frame on the wire is a JSON envelope `{"type": <kind>, "data": {...}}`.
//! Decoding is two-phase: the shell is read first to recover `type`, then
//! `data` is decoded into the payload shape that kind maps to. All code past
//! this boundary works on the closed [`Message`] enum.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Discriminator carried in the envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    UserJoined,
    UserLeft,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::UserJoined => "user_joined",
            MessageKind::UserLeft => "user_left",
        }
    }
}

impl FromStr for MessageKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(MessageKind::Chat),
            "user_joined" => Ok(MessageKind::UserJoined),
            "user_left" => Ok(MessageKind::UserLeft),
            other => Err(CodecError::UnknownMessageKind(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat line authored by a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub from: String,
}

/// Someone entered the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoined {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub name: String,
}

/// Someone left the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeft {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub name: String,
}

/// Domain message: the kind and the payload type always agree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Chat(ChatMessage),
    UserJoined(UserJoined),
    UserLeft(UserLeft),
}

impl Message {
    pub fn chat(from: impl Into<String>, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Message::Chat(ChatMessage {
            timestamp,
            message: message.into(),
            from: from.into(),
        })
    }

    pub fn user_joined(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Message::UserJoined(UserJoined {
            timestamp,
            name: name.into(),
        })
    }

    pub fn user_left(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Message::UserLeft(UserLeft {
            timestamp,
            name: name.into(),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Chat(_) => MessageKind::Chat,
            Message::UserJoined(_) => MessageKind::UserJoined,
            Message::UserLeft(_) => MessageKind::UserLeft,
        }
    }
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, T> {
    #[serde(rename = "type")]
    kind: MessageKind,
    data: &'a T,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

/// Encode a message into its JSON envelope
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    match message {
        Message::Chat(data) => to_envelope(MessageKind::Chat, data),
        Message::UserJoined(data) => to_envelope(MessageKind::UserJoined, data),
        Message::UserLeft(data) => to_envelope(MessageKind::UserLeft, data),
    }
}

/// Decode a JSON envelope
///
/// Unknown kinds fail with [`CodecError::UnknownMessageKind`]; bad JSON in
/// either phase fails with [`CodecError::MalformedEnvelope`].
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let envelope: IncomingEnvelope =
        serde_json::from_slice(bytes).map_err(CodecError::MalformedEnvelope)?;

    let message = match envelope.kind.parse::<MessageKind>()? {
        MessageKind::Chat => Message::Chat(from_data(envelope.data)?),
        MessageKind::UserJoined => Message::UserJoined(from_data(envelope.data)?),
        MessageKind::UserLeft => Message::UserLeft(from_data(envelope.data)?),
    };

    Ok(message)
}

fn to_envelope<T: Serialize>(kind: MessageKind, data: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&OutgoingEnvelope { kind, data }).map_err(CodecError::Encode)
}

fn from_data<T: DeserializeOwned>(data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(CodecError::MalformedEnvelope)
}

/// Fixed RFC 3339 timestamp format
///
/// Always UTC with a `Z` suffix and nine fractional digits, so encoded
/// output is stable byte-for-byte. Decoding accepts any RFC 3339 offset.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}
