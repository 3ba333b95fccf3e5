//! Addressed, bidirectional frame delivery.
//!
//! A `Transport` mints endpoints; an `Endpoint` owns one unique address and
//! sends/receives `[routing address, header, payload]` frames. Two adapters
//! ship: an in-process `Fabric` for co-located workers and tests, and
//! `TcpTransport` for real deployments.

mod fabric;
mod tcp;

pub use fabric::Fabric;
pub use tcp::TcpTransport;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use cairn_core::wire::{Address, Frame};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind a new endpoint at a fresh, unique address.
    async fn bind(&self) -> Result<Box<dyn Endpoint>, TransportError>;

    /// Bind a new endpoint at a caller-chosen address.
    async fn bind_at(&self, address: &Address) -> Result<Box<dyn Endpoint>, TransportError>;
}

#[async_trait]
pub trait Endpoint: Send + Sync {
    fn address(&self) -> &Address;

    /// Deliver one frame to `target`. The receiver sees our address as the
    /// routing address.
    async fn send(&self, target: &Address, header: Bytes, payload: Bytes) -> Result<(), TransportError>;

    /// Wait for the next inbound frame.
    ///
    /// An error here means the endpoint can no longer receive anything.
    async fn recv(&mut self) -> Result<Frame, TransportError>;
}

// ── Address generation ───────────────────────────────────────────────────────

/// Source of fresh endpoint addresses, owned by one transport instance.
pub trait AddressGenerator: Send + Sync {
    fn next_address(&self) -> Address;
}

/// `{scheme}://{prefix}-0`, `{scheme}://{prefix}-1`, ...
pub struct SequentialAddresses {
    scheme: String,
    prefix: String,
    next: AtomicU64,
}

impl SequentialAddresses {
    pub fn new(scheme: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl AddressGenerator for SequentialAddresses {
    fn next_address(&self) -> Address {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Address::new(format!("{}://{}-{}", self.scheme, self.prefix, n))
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("address {0} is already bound")]
    AddressInUse(Address),

    #[error("invalid address {0}")]
    InvalidAddress(Address),

    #[error("{0} is unreachable")]
    Unreachable(Address),

    #[error("frame of {0} bytes exceeds the transport limit")]
    FrameTooLarge(usize),

    #[error("endpoint {0} is closed")]
    Closed(Address),

    #[error("i/o error on {address}: {source}")]
    Io {
        address: Address,
        #[source]
        source: std::io::Error,
    },
}
