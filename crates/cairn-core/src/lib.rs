//! cairn-core — wire format, payload schemas, codecs and configuration.
//! All other Cairn crates depend on this one.

pub mod codec;
pub mod config;
pub mod message;
pub mod wire;

pub use codec::{CodecError, CodecId};
pub use message::{ArgSpec, ErrorKind, Locations, Outcome, RemoteError, Request, TaskSpec};
pub use wire::{Address, Frame, Function, Header, Status};
