//! The wire envelope exchanged between peers.
//!
//! Encoded as JSON with the payload in standard base64:
//!
//! ```json
//! {
//!   "data": "aGVsbG8=",
//!   "attributes": { "room": "lobby" },
//!   "message_id": "5b0e9c1e-8f7d-4a51-9d8e-2f5b1f3c9a10",
//!   "publish_time": "2024-05-01T12:00:00.123456789Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-keyed message attributes.
pub type Attributes = std::collections::BTreeMap<String, String>;

/// An immutable message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "base64_data")]
    data: Vec<u8>,

    #[serde(default, deserialize_with = "nullable::deserialize")]
    attributes: Attributes,

    message_id: String,

    publish_time: DateTime<Utc>,
}

impl Message {
    /// Mint a new message with a fresh identifier, published now.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>, attributes: Attributes) -> Self {
        Self::published_at(data, attributes, Utc::now())
    }

    /// Mint a new message with a fresh identifier and the given publish time.
    #[must_use]
    pub fn published_at(
        data: impl Into<Vec<u8>>,
        attributes: Attributes,
        publish_time: DateTime<Utc>,
    ) -> Self {
        Self {
            data: data.into(),
            attributes,
            message_id: Uuid::new_v4().to_string(),
            publish_time,
        }
    }

    /// Rebuild a message from all of its parts, keeping the identifier.
    #[must_use]
    pub fn from_parts(
        data: Vec<u8>,
        attributes: Attributes,
        message_id: String,
        publish_time: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            attributes,
            message_id,
            publish_time,
        }
    }

    /// The payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the message, returning the payload.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The message attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The unique message identifier.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// When the message was minted.
    #[must_use]
    pub const fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    /// Overlay a peer's sticky attributes; the sticky value wins on collision.
    #[must_use]
    pub(crate) fn with_sticky(mut self, sticky: &Attributes) -> Self {
        for (key, value) in sticky {
            self.attributes.insert(key.clone(), value.clone());
        }
        self
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Payload as standard base64; `null` decodes as empty.
mod base64_data {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Treats an explicit `null` like a missing field.
mod nullable {
    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}
