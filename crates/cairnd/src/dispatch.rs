//! The worker's control loop.
//!
//! One `Dispatcher` owns the worker's endpoint and is the only thing that
//! sends replies from it. It reads a frame, runs the matching handler to
//! completion, and only then reads the next one. Compute completions come
//! back from the executor over the hand-off channel and are answered from
//! the same loop.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use cairn_core::codec::CodecId;
use cairn_core::message::{
    ArgSpec, ComputeReply, ComputeRequest, DelitemRequest, GetitemReply, GetitemRequest, ItemAck,
    RemoteError, Request, RequestError, SetitemRequest, TaskSpec,
};
use cairn_core::wire::{Address, Frame, Function, Header, Status, STATUS_OK};
use cairn_services::{Completion, DataStore, Endpoint, PendingTask, RemoteFetcher, TaskExecutor};

use crate::error::WorkerError;
use crate::lifecycle::Lifecycle;

/// Where and how a reply goes.
#[derive(Debug, Clone)]
struct ReplyTo {
    target: Address,
    jobid: Option<u64>,
    codec: CodecId,
}

pub struct Dispatcher {
    endpoint: Box<dyn Endpoint>,
    store: DataStore,
    fetcher: RemoteFetcher,
    executor: TaskExecutor,
    completions: mpsc::UnboundedReceiver<Completion>,
    lifecycle: Lifecycle,
}

impl Dispatcher {
    pub fn new(
        endpoint: Box<dyn Endpoint>,
        store: DataStore,
        fetcher: RemoteFetcher,
        executor: TaskExecutor,
        completions: mpsc::UnboundedReceiver<Completion>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            endpoint,
            store,
            fetcher,
            executor,
            completions,
            lifecycle,
        }
    }

    /// Serve frames until the worker closes or its endpoint fails.
    ///
    /// Dropping `self` on return releases the address and discards any
    /// completion that arrives later.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let mut state = self.lifecycle.subscribe();
        self.lifecycle.mark_running();
        tracing::info!(address = %self.endpoint.address(), "worker running");

        let result = loop {
            if self.lifecycle.current().is_closing() {
                break Ok(());
            }

            // Close wins over anything else that is ready: no reply goes
            // out once the worker is closing.
            tokio::select! {
                biased;

                _ = state.changed() => {}

                Some(done) = self.completions.recv() => {
                    if self.lifecycle.current().is_closing() {
                        break Ok(());
                    }
                    self.finish_task(done).await;
                }

                frame = self.endpoint.recv() => match frame {
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(e) => {
                        tracing::error!(address = %self.endpoint.address(), error = %e, "worker endpoint failed");
                        break Err(WorkerError::Transport(e));
                    }
                },
            }
        };

        let executor = self.executor.clone();
        self.lifecycle.close(|| executor.close());
        tracing::info!(address = %self.endpoint.address(), "worker closed");
        result
    }

    // ── Frame routing ────────────────────────────────────────────────────────

    async fn handle_frame(&mut self, frame: Frame) {
        let header = match Header::decode(&frame.header) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(from = %frame.address, error = %e, "undecodable header");
                let to = ReplyTo {
                    target: frame.address,
                    jobid: None,
                    codec: CodecId::default(),
                };
                self.send_error(&to, RemoteError::from(e)).await;
                return;
            }
        };

        if header.function.is_reply() {
            tracing::debug!(from = %frame.address, function = %header.function, "ignoring reply-kind frame");
            return;
        }

        let codec = header.payload_codec();
        let to = ReplyTo {
            target: header.address.clone().unwrap_or(frame.address),
            jobid: header.jobid,
            codec: header.reply_codec.unwrap_or(codec),
        };

        let request = match Request::decode(&header.function, codec, &frame.payload) {
            Ok(r) => r,
            Err(RequestError::Unsupported(function)) => {
                tracing::warn!(from = %to.target, %function, "unknown request");
                self.send_error(&to, RemoteError::unknown_request(&function)).await;
                return;
            }
            Err(RequestError::Codec(e)) => {
                tracing::warn!(from = %to.target, function = %header.function, error = %e, "undecodable payload");
                self.send_error(&to, RemoteError::from(e)).await;
                return;
            }
        };

        tracing::trace!(from = %to.target, function = %header.function, jobid = ?to.jobid, "request");
        match request {
            Request::Status => self.status(&to).await,
            Request::Getitem(req) => self.getitem(&to, req).await,
            Request::Setitem(req) => self.setitem(&to, req).await,
            Request::Delitem(req) => self.delitem(&to, req).await,
            Request::Compute(req) => self.compute(to, req).await,
            Request::Close => self.close(),
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────────────

    async fn status(&self, to: &ReplyTo) {
        self.send(to, Function::Status, Status::Ok, STATUS_OK).await;
    }

    async fn getitem(&self, to: &ReplyTo, req: GetitemRequest) {
        let value = self
            .store
            .get(&req.key)
            .ok_or_else(|| RemoteError::key_not_found(&req.key));
        let status = Status::from(&value);
        let reply = GetitemReply {
            value,
            queue: req.queue,
        };
        self.send(to, Function::GetitemAck, status, &reply).await;
    }

    async fn setitem(&self, to: &ReplyTo, req: SetitemRequest) {
        self.store.insert(req.key.clone(), req.value);
        if req.reply {
            let ack = ItemAck { key: req.key };
            self.send(to, Function::SetitemAck, Status::Ok, &ack).await;
        }
    }

    async fn delitem(&self, to: &ReplyTo, req: DelitemRequest) {
        self.store.remove(&req.key);
        if req.reply {
            let ack = ItemAck { key: req.key };
            self.send(to, Function::DelitemAck, Status::Ok, &ack).await;
        }
    }

    /// Fetch remote dependencies, resolve arguments, and hand the task to the
    /// executor. Anything that fails before submission is answered at once.
    async fn compute(&self, to: ReplyTo, req: ComputeRequest) {
        let pending = PendingTask {
            key: req.key,
            task: req.task,
            origin: to.target,
            jobid: to.jobid,
            queue: req.queue,
            reply_codec: Some(to.codec),
            submitted_at: Instant::now(),
        };

        if let Err(e) = self.fetcher.collect(&req.locations).await {
            tracing::warn!(key = %pending.key, error = %e, "dependency fetch failed");
            self.fail_task(pending, e.into_remote()).await;
            return;
        }

        let args = match resolve_args(&self.store, &pending.task) {
            Ok(args) => args,
            Err(e) => {
                self.fail_task(pending, e).await;
                return;
            }
        };

        let key = pending.key.clone();
        if let Err(e) = self.executor.submit(pending, args) {
            // Only possible once closing, and then nobody is left to answer.
            tracing::warn!(%key, error = %e, "compute task not submitted");
        }
    }

    fn close(&self) {
        let executor = self.executor.clone();
        if self.lifecycle.close(|| executor.close()) {
            tracing::info!(address = %self.endpoint.address(), "close requested");
        }
    }

    // ── Completions ──────────────────────────────────────────────────────────

    async fn fail_task(&self, task: PendingTask, error: RemoteError) {
        let duration = task.submitted_at.elapsed();
        self.finish_task(Completion {
            task,
            result: Err(error),
            duration,
        })
        .await;
    }

    /// Store a successful value and send the task's one compute-ack.
    async fn finish_task(&self, done: Completion) {
        let Completion {
            task,
            result,
            duration,
        } = done;

        let status = Status::from(&result);
        let error = match result {
            Ok(value) => {
                self.store.insert(task.key.clone(), value);
                None
            }
            Err(e) => {
                tracing::debug!(key = %task.key, error = %e, "compute task failed");
                Some(e)
            }
        };

        let to = ReplyTo {
            target: task.origin,
            jobid: task.jobid,
            codec: task.reply_codec.unwrap_or_default(),
        };
        let reply = ComputeReply {
            key: task.key,
            duration: duration.as_secs_f64(),
            status,
            queue: task.queue,
            error,
        };
        self.send(&to, Function::ComputeAck, status, &reply).await;
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    async fn send_error(&self, to: &ReplyTo, error: RemoteError) {
        self.send(to, Function::Error, Status::Error, &error).await;
    }

    async fn send<T: Serialize + ?Sized>(&self, to: &ReplyTo, function: Function, status: Status, payload: &T) {
        let header = Header::new(function.clone())
            .with_jobid(to.jobid)
            .with_address(self.endpoint.address().clone())
            .with_status(status)
            .with_codec(to.codec);

        let encoded = header
            .encode()
            .and_then(|h| to.codec.encode(payload).map(|p| (h, p)));
        let (header, payload) = match encoded {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(to = %to.target, %function, error = %e, "failed to encode reply");
                return;
            }
        };

        if let Err(e) = self.endpoint.send(&to.target, header, payload).await {
            tracing::warn!(to = %to.target, %function, error = %e, "failed to send reply");
        }
    }
}

/// Turn argument specs into values. Key arguments must already be stored.
fn resolve_args(store: &DataStore, task: &TaskSpec) -> Result<Vec<Value>, RemoteError> {
    task.args
        .iter()
        .map(|arg| match arg {
            ArgSpec::Key(key) => store.get(key).ok_or_else(|| RemoteError::key_not_found(key)),
            ArgSpec::Literal(value) => Ok(value.clone()),
        })
        .collect()
}
