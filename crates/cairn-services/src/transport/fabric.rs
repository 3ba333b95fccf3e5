//! In-process transport.
//!
//! Every endpoint is a mailbox in a routing table shared by clones of one
//! `Fabric`. Sending to an address with no mailbox fails with `Unreachable`.
//! `reserve` creates a mailbox ahead of the bind, so frames sent to it are
//! held until someone binds the address; this lets a worker announce itself
//! before its scheduler is listening. Dropping a bound endpoint removes its
//! mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use cairn_core::wire::{Address, Frame};

use super::{AddressGenerator, Endpoint, SequentialAddresses, Transport, TransportError};

struct Mailbox {
    tx: mpsc::UnboundedSender<Frame>,
    /// Present until an endpoint claims the mailbox.
    rx: Option<mpsc::UnboundedReceiver<Frame>>,
}

impl Mailbox {
    fn unclaimed() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

struct Inner {
    mailboxes: DashMap<Address, Mailbox>,
    addresses: Box<dyn AddressGenerator>,
}

/// Shared in-process routing table. Clones route to the same endpoints.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<Inner>,
}

impl Fabric {
    /// Fabric minting `inproc://node-N` addresses.
    pub fn new() -> Self {
        Self::with_generator(SequentialAddresses::new("inproc", "node"))
    }

    pub fn with_generator(addresses: impl AddressGenerator + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                mailboxes: DashMap::new(),
                addresses: Box::new(addresses),
            }),
        }
    }

    /// Hold frames sent to `address` until it is bound. No-op if the
    /// address already has a mailbox.
    pub fn reserve(&self, address: &Address) {
        self.inner
            .mailboxes
            .entry(address.clone())
            .or_insert_with(Mailbox::unclaimed);
    }

    /// Number of live mailboxes, bound or reserved.
    pub fn mailboxes(&self) -> usize {
        self.inner.mailboxes.len()
    }

    fn claim(&self, address: &Address) -> Result<FabricEndpoint, TransportError> {
        let rx = match self.inner.mailboxes.entry(address.clone()) {
            Entry::Occupied(mut entry) => match entry.get_mut().rx.take() {
                Some(rx) => rx,
                None => return Err(TransportError::AddressInUse(address.clone())),
            },
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                entry.insert(Mailbox { tx, rx: None });
                rx
            }
        };

        tracing::trace!(%address, "fabric endpoint bound");
        Ok(FabricEndpoint {
            address: address.clone(),
            rx,
            fabric: self.clone(),
        })
    }

    fn deliver(&self, target: &Address, frame: Frame) -> Result<(), TransportError> {
        let unreachable = || TransportError::Unreachable(target.clone());
        let mailbox = self.inner.mailboxes.get(target).ok_or_else(unreachable)?;
        mailbox.tx.send(frame).map_err(|_| unreachable())
    }

    fn release(&self, address: &Address) {
        let removed = self
            .inner
            .mailboxes
            .remove_if(address, |_, mailbox| mailbox.rx.is_none() && mailbox.tx.is_closed());
        if removed.is_some() {
            tracing::trace!(%address, "fabric endpoint released");
        }
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for Fabric {
    async fn bind(&self) -> Result<Box<dyn Endpoint>, TransportError> {
        // Skip addresses a caller already took with `bind_at`.
        loop {
            let address = self.inner.addresses.next_address();
            match self.claim(&address) {
                Ok(endpoint) => return Ok(Box::new(endpoint)),
                Err(TransportError::AddressInUse(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn bind_at(&self, address: &Address) -> Result<Box<dyn Endpoint>, TransportError> {
        if address.is_empty() {
            return Err(TransportError::InvalidAddress(address.clone()));
        }
        Ok(Box::new(self.claim(address)?))
    }
}

pub struct FabricEndpoint {
    address: Address,
    rx: mpsc::UnboundedReceiver<Frame>,
    fabric: Fabric,
}

impl Drop for FabricEndpoint {
    fn drop(&mut self) {
        self.rx.close();
        self.fabric.release(&self.address);
    }
}

#[async_trait]
impl Endpoint for FabricEndpoint {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn send(&self, target: &Address, header: Bytes, payload: Bytes) -> Result<(), TransportError> {
        let frame = Frame {
            address: self.address.clone(),
            header,
            payload,
        };
        self.fabric.deliver(target, frame)
    }

    async fn recv(&mut self) -> Result<Frame, TransportError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| TransportError::Closed(self.address.clone()))
    }
}
