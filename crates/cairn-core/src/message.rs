//! Payload schemas, one per request and reply kind.
//!
//! Stored and computed values are opaque JSON documents (`serde_json::Value`);
//! the worker never inspects them beyond handing them to registered functions.
//! Application failures travel as `RemoteError` values inside an `Outcome`,
//! never as transport errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{CodecError, CodecId};
use crate::wire::{Address, Function, Status};

/// Result of a lookup or computation as seen by the remote side.
///
/// Serialized as `{"Ok": value}` or `{"Err": {"kind": ..., "message": ...}}`.
pub type Outcome = Result<Value, RemoteError>;

/// Requester-chosen correlation token, echoed unchanged.
pub type QueueTag = Value;

/// Candidate peers for each dependency key, in preference order.
pub type Locations = BTreeMap<String, Vec<Address>>;

// ── Errors as values ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    KeyNotFound,
    CallableFailed,
    UnknownCallable,
    FetchFailed,
    Decode,
    UnknownRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::KeyNotFound => "key not found",
            ErrorKind::CallableFailed => "callable failed",
            ErrorKind::UnknownCallable => "unknown callable",
            ErrorKind::FetchFailed => "fetch failed",
            ErrorKind::Decode => "decode error",
            ErrorKind::UnknownRequest => "unknown request",
        };
        f.write_str(s)
    }
}

/// An application-level failure, captured for the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn key_not_found(key: &str) -> Self {
        Self::new(ErrorKind::KeyNotFound, key)
    }

    pub fn unknown_callable(name: &str) -> Self {
        Self::new(ErrorKind::UnknownCallable, name)
    }

    pub fn unknown_request(function: &Function) -> Self {
        Self::new(
            ErrorKind::UnknownRequest,
            format!("no handler for function {function:?}", function = function.as_str()),
        )
    }
}

impl From<CodecError> for RemoteError {
    fn from(e: CodecError) -> Self {
        Self::new(ErrorKind::Decode, e.to_string())
    }
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// One positional argument of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSpec {
    /// Resolved from the data store (after any remote fetch).
    Key(String),
    /// Passed through as-is.
    Literal(Value),
}

/// A named callable plus its argument specs.
///
/// Callables are resolved against the executing worker's function registry;
/// code never travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub function: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

impl TaskSpec {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.args.push(ArgSpec::Key(key.into()));
        self
    }

    pub fn literal(mut self, value: impl Into<Value>) -> Self {
        self.args.push(ArgSpec::Literal(value.into()));
        self
    }

    /// Keys this task reads, in argument order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|a| match a {
            ArgSpec::Key(k) => Some(k.as_str()),
            ArgSpec::Literal(_) => None,
        })
    }
}

// ── Request payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetitemRequest {
    pub key: String,
    #[serde(default)]
    pub queue: QueueTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetitemRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub reply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelitemRequest {
    pub key: String,
    #[serde(default)]
    pub reply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    /// Data store key the result is written under.
    pub key: String,
    pub task: TaskSpec,
    #[serde(default)]
    pub locations: Locations,
    #[serde(default)]
    pub queue: QueueTag,
}

/// Handshake payload sent to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub address: Address,
}

// ── Reply payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetitemReply {
    pub value: Outcome,
    #[serde(default)]
    pub queue: QueueTag,
}

/// Acknowledgment of `setitem` / `delitem` when `reply` was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAck {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeReply {
    pub key: String,
    /// Seconds from acceptance of the request to completion.
    pub duration: f64,
    pub status: Status,
    #[serde(default)]
    pub queue: QueueTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

// ── Decoded requests ─────────────────────────────────────────────────────────

/// A request the worker knows how to serve, one variant per handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Status,
    Getitem(GetitemRequest),
    Setitem(SetitemRequest),
    Delitem(DelitemRequest),
    Compute(ComputeRequest),
    Close,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("no handler for function {0:?}")]
    Unsupported(Function),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Request {
    /// Decode the payload for `function`. Status and close ignore their payload.
    pub fn decode(function: &Function, codec: CodecId, payload: &[u8]) -> Result<Self, RequestError> {
        let request = match function {
            Function::Status => Request::Status,
            Function::Close => Request::Close,
            Function::Getitem => Request::Getitem(codec.decode(payload)?),
            Function::Setitem => Request::Setitem(codec.decode(payload)?),
            Function::Delitem => Request::Delitem(codec.decode(payload)?),
            Function::Compute => Request::Compute(codec.decode(payload)?),
            other => return Err(RequestError::Unsupported(other.clone())),
        };
        Ok(request)
    }
}
