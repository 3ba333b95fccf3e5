//! Cairn wire format — addresses, headers and frames.
//!
//! Every message on a Cairn transport is three byte strings:
//! `[routing address, header, payload]`. The header is always encoded with
//! the default codec so a receiver can read it before it knows anything about
//! the payload. The payload is encoded with the codec named in the header.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecId};

// ── Address ──────────────────────────────────────────────────────────────────

/// Routable identity of an endpoint, e.g. `inproc://node-3` or
/// `tcp://127.0.0.1:40123`.
///
/// Opaque to everything except the transport that minted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Function ─────────────────────────────────────────────────────────────────

/// Request and reply kinds carried in `Header::function`.
///
/// Serialized as the bare protocol string. Anything unrecognised decodes to
/// `Other` so the dispatcher can answer it instead of failing the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Function {
    Status,
    Getitem,
    GetitemAck,
    Setitem,
    SetitemAck,
    Delitem,
    DelitemAck,
    Compute,
    ComputeAck,
    Close,
    /// Handshake sent by a worker to its scheduler on startup.
    Register,
    /// Reply to a request that could not be decoded or routed.
    Error,
    Other(String),
}

impl Function {
    pub fn as_str(&self) -> &str {
        match self {
            Function::Status => "status",
            Function::Getitem => "getitem",
            Function::GetitemAck => "getitem-ack",
            Function::Setitem => "setitem",
            Function::SetitemAck => "setitem-ack",
            Function::Delitem => "delitem",
            Function::DelitemAck => "delitem-ack",
            Function::Compute => "compute",
            Function::ComputeAck => "compute-ack",
            Function::Close => "close",
            Function::Register => "register",
            Function::Error => "error",
            Function::Other(s) => s,
        }
    }

    /// True for kinds that must never be answered.
    ///
    /// A worker that replied to replies could ping-pong errors with a peer
    /// forever.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Function::GetitemAck
                | Function::SetitemAck
                | Function::DelitemAck
                | Function::ComputeAck
                | Function::Register
                | Function::Error
        )
    }
}

impl From<String> for Function {
    fn from(s: String) -> Self {
        match s.as_str() {
            "status" => Function::Status,
            "getitem" => Function::Getitem,
            "getitem-ack" => Function::GetitemAck,
            "setitem" => Function::Setitem,
            "setitem-ack" => Function::SetitemAck,
            "delitem" => Function::Delitem,
            "delitem-ack" => Function::DelitemAck,
            "compute" => Function::Compute,
            "compute-ack" => Function::ComputeAck,
            "close" => Function::Close,
            "register" => Function::Register,
            "error" => Function::Error,
            _ => Function::Other(s),
        }
    }
}

impl From<Function> for String {
    fn from(f: Function) -> String {
        match f {
            Function::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

/// Outcome flag of a reply. Requests carry `Ok`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl<T, E> From<&Result<T, E>> for Status {
    fn from(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Status::Ok
        } else {
            Status::Error
        }
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Message header. Always encoded with `CodecId::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Caller-assigned correlation id, echoed verbatim in replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobid: Option<u64>,

    pub function: Function,

    /// The sender's own routable address. Replies go here when present,
    /// otherwise to the frame's routing address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    #[serde(default)]
    pub status: Status,

    /// Codec of this frame's payload. Absent means the default codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<CodecId>,

    /// Codec the requester wants the reply payload encoded with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_codec: Option<CodecId>,
}

impl Header {
    pub fn new(function: Function) -> Self {
        Self {
            jobid: None,
            function,
            address: None,
            status: Status::Ok,
            codec: None,
            reply_codec: None,
        }
    }

    pub fn with_jobid(mut self, jobid: Option<u64>) -> Self {
        self.jobid = jobid;
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_codec(mut self, codec: CodecId) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_reply_codec(mut self, codec: CodecId) -> Self {
        self.reply_codec = Some(codec);
        self
    }

    /// Codec the payload accompanying this header was encoded with.
    pub fn payload_codec(&self) -> CodecId {
        self.codec.unwrap_or_default()
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        CodecId::default().encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        CodecId::default().decode(bytes)
    }
}

// ── Frame ────────────────────────────────────────────────────────────────────

/// One received unit of transport traffic.
///
/// `address` is the routing address: the sender on receipt.
#[derive(Debug, Clone)]
pub struct Frame {
    pub address: Address,
    pub header: Bytes,
    pub payload: Bytes,
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Payload of a successful `status` reply.
pub const STATUS_OK: &str = "OK";

/// Largest single byte string a transport accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// ── Tests ────────────────────────────────────────────────────────────────────
