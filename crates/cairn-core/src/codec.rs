//! Payload codecs.
//!
//! The set of codecs is closed and versioned. A requester names one by id in
//! `Header::reply_codec`; the id is resolved here and nowhere else. Changing
//! the encoding of an existing id is a breaking change; add a new id instead.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Registered payload codecs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    /// UTF-8 JSON via serde_json.
    #[default]
    #[serde(rename = "json/1")]
    Json,
    /// MessagePack with named struct fields via rmp-serde.
    #[serde(rename = "msgpack/1")]
    MessagePack,
}

impl CodecId {
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Json => "json/1",
            CodecId::MessagePack => "msgpack/1",
        }
    }

    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes, CodecError> {
        let raw = match self {
            CodecId::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            // Named fields keep structs as maps, so optional fields can be skipped.
            CodecId::MessagePack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
        };
        raw.map(Bytes::from)
            .map_err(|reason| CodecError::Encode { codec: self, reason })
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        let value = match self {
            CodecId::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            CodecId::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        };
        value.map_err(|reason| CodecError::Decode { codec: self, reason })
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {codec} payload: {reason}")]
    Encode { codec: CodecId, reason: String },

    #[error("failed to decode {codec} payload: {reason}")]
    Decode { codec: CodecId, reason: String },
}
