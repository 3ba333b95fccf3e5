//! Cairn integration test harness.
//!
//! Workers run in-process on a shared `Fabric` (or on loopback TCP in
//! `tcp.rs`). A test plays the scheduler: it owns a plain endpoint, sends
//! request frames to workers, and inspects the replies.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use cairn_core::wire::{Address, Function, Header};
use cairn_services::{Endpoint, Fabric, FunctionRegistry, Transport};
use cairnd::{Worker, WorkerOptions};

mod items;
mod status;
mod tcp;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SCHEDULER: &str = "inproc://scheduler";

/// How long any single reply may take before a test fails.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded inbound frame.
#[derive(Debug)]
pub struct Reply {
    pub from: Address,
    pub header: Header,
    pub payload: Bytes,
}

impl Reply {
    /// Decode the payload with the codec the header names.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.header
            .payload_codec()
            .decode(&self.payload)
            .with_context(|| format!("decoding {} payload", self.header.function))
    }
}

/// The test's side of the conversation: one endpoint standing in for the
/// scheduler.
pub struct Scheduler {
    endpoint: Box<dyn Endpoint>,
    next_jobid: u64,
}

impl Scheduler {
    pub async fn bind_at(transport: &dyn Transport, address: &str) -> Result<Self> {
        let endpoint = transport.bind_at(&Address::from(address)).await?;
        Ok(Self {
            endpoint,
            next_jobid: 1,
        })
    }

    pub async fn bind(transport: &dyn Transport) -> Result<Self> {
        Ok(Self {
            endpoint: transport.bind().await?,
            next_jobid: 1,
        })
    }

    pub fn address(&self) -> &Address {
        self.endpoint.address()
    }

    /// A fresh jobid, unique for this scheduler.
    pub fn jobid(&mut self) -> u64 {
        let id = self.next_jobid;
        self.next_jobid += 1;
        id
    }

    /// Send a JSON request carrying our own address and a fresh jobid.
    pub async fn send<T: Serialize + ?Sized>(&mut self, to: &Address, function: Function, payload: &T) -> Result<u64> {
        let jobid = self.jobid();
        let header = Header::new(function)
            .with_jobid(Some(jobid))
            .with_address(self.address().clone());
        self.send_with(to, header, payload).await?;
        Ok(jobid)
    }

    /// Send with a caller-built header. The payload uses the header's codec.
    pub async fn send_with<T: Serialize + ?Sized>(&self, to: &Address, header: Header, payload: &T) -> Result<()> {
        let body = header.payload_codec().encode(payload)?;
        self.send_raw(to, header.encode()?, body).await
    }

    pub async fn send_raw(&self, to: &Address, header: Bytes, payload: Bytes) -> Result<()> {
        self.endpoint.send(to, header, payload).await?;
        Ok(())
    }

    /// Next frame, registrations included.
    pub async fn recv_any(&mut self) -> Result<Reply> {
        let frame = tokio::time::timeout(REPLY_TIMEOUT, self.endpoint.recv())
            .await
            .context("timed out waiting for a reply")??;
        Ok(Reply {
            from: frame.address,
            header: Header::decode(&frame.header)?,
            payload: frame.payload,
        })
    }

    /// Next frame that is not a worker registration.
    pub async fn recv(&mut self) -> Result<Reply> {
        loop {
            let reply = self.recv_any().await?;
            if reply.header.function != Function::Register {
                return Ok(reply);
            }
        }
    }

    /// Send a request and wait for its reply.
    pub async fn request<T: Serialize + ?Sized>(&mut self, to: &Address, function: Function, payload: &T) -> Result<Reply> {
        let jobid = self.send(to, function, payload).await?;
        let reply = self.recv().await?;
        if reply.header.jobid != Some(jobid) {
            bail!("expected reply to job {jobid}, got {:?}", reply.header);
        }
        Ok(reply)
    }

    /// Fails if any non-registration frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.endpoint.recv()).await {
                Err(_) => return Ok(()),
                Ok(frame) => {
                    let frame = frame?;
                    let header = Header::decode(&frame.header)?;
                    if header.function != Function::Register {
                        bail!("expected no reply, got {header:?}");
                    }
                }
            }
        }
    }
}

/// Builtins plus a few callables the tests lean on.
pub fn registry() -> Arc<FunctionRegistry> {
    let registry = FunctionRegistry::with_builtins();
    registry.register("fail", |_| anyhow::bail!("deliberate failure"));
    registry.register("slow", |args| {
        let ms = args.first().and_then(Value::as_u64).unwrap_or(200);
        std::thread::sleep(Duration::from_millis(ms));
        Ok(Value::from(ms))
    });
    Arc::new(registry)
}

/// Start a worker on `fabric` that registers with `SCHEDULER`.
pub async fn start_worker(fabric: &Fabric) -> Result<Worker> {
    start_worker_with(fabric, WorkerOptions::default()).await
}

/// The scheduler address is reserved first, so the registration is held
/// until the test binds it.
pub async fn start_worker_with(fabric: &Fabric, options: WorkerOptions) -> Result<Worker> {
    fabric.reserve(&Address::from(SCHEDULER));
    let worker = Worker::start(Arc::new(fabric.clone()), registry(), options.scheduler(SCHEDULER)).await?;
    Ok(worker)
}

/// Poll `check` until it holds or `REPLY_TIMEOUT` passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
