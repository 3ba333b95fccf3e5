//! Compute executor — runs registered callables off the dispatch loop.
//!
//! `submit` returns immediately. Each accepted task waits for one of the
//! executor's slots, runs its callable on the blocking pool, and posts a
//! `Completion` on the hand-off channel returned by `TaskExecutor::new`.
//! The executor never touches the data store or the transport; whoever owns
//! the receiving end decides what a completion means.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use cairn_core::codec::CodecId;
use cairn_core::message::{ErrorKind, Outcome, QueueTag, RemoteError, TaskSpec};
use cairn_core::wire::Address;

use crate::registry::FunctionRegistry;

/// An accepted compute request. Owes exactly one reply to `origin`.
#[derive(Debug, Clone)]
pub struct PendingTask {
    /// Data store key the result is written under.
    pub key: String,
    pub task: TaskSpec,
    pub origin: Address,
    pub jobid: Option<u64>,
    pub queue: QueueTag,
    pub reply_codec: Option<CodecId>,
    pub submitted_at: Instant,
}

/// A finished task, successful or not.
#[derive(Debug)]
pub struct Completion {
    pub task: PendingTask,
    pub result: Outcome,
    /// Time from acceptance to completion.
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor is closed to new submissions")]
    Closed,
}

/// Bounded pool of execution slots. Clones share slots and the closed flag.
#[derive(Clone)]
pub struct TaskExecutor {
    registry: Arc<FunctionRegistry>,
    slots: Arc<Semaphore>,
    capacity: usize,
    closed: Arc<AtomicBool>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl TaskExecutor {
    /// Returns the executor and the receiving end of its completion channel.
    pub fn new(
        registry: Arc<FunctionRegistry>,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let capacity = capacity.max(1);
        let (completions, rx) = mpsc::unbounded_channel();
        let executor = Self {
            registry,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            closed: Arc::new(AtomicBool::new(false)),
            completions,
        };
        tracing::info!(max_concurrent = capacity, "compute executor started");
        (executor, rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently running a task.
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queue `task` with already-resolved `args`. Never blocks.
    ///
    /// An unregistered callable is not a submission error: the task completes
    /// immediately with an `unknown_callable` result so its reply still goes out.
    pub fn submit(&self, task: PendingTask, args: Vec<Value>) -> Result<(), ExecutorError> {
        if self.is_closed() {
            return Err(ExecutorError::Closed);
        }

        let Some(callable) = self.registry.get(&task.task.function) else {
            let result = Err(RemoteError::unknown_callable(&task.task.function));
            deliver(&self.completions, task, result);
            return Ok(());
        };

        let slots = self.slots.clone();
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let permit = match slots.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // semaphore closed
            };

            let name = task.task.function.clone();
            let result = match tokio::task::spawn_blocking(move || callable(args.as_slice())).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(RemoteError::new(
                    ErrorKind::CallableFailed,
                    format!("{name}: {e:#}"),
                )),
                Err(e) if e.is_panic() => Err(RemoteError::new(
                    ErrorKind::CallableFailed,
                    format!("{name} panicked: {}", panic_message(e.into_panic())),
                )),
                Err(_) => Err(RemoteError::new(
                    ErrorKind::CallableFailed,
                    format!("{name} was cancelled"),
                )),
            };
            drop(permit);

            deliver(&completions, task, result);
        });

        Ok(())
    }

    /// Stop accepting submissions. Tasks already submitted still run.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("compute executor closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn deliver(completions: &mpsc::UnboundedSender<Completion>, task: PendingTask, result: Outcome) {
    let duration = task.submitted_at.elapsed();
    tracing::debug!(
        key = %task.key,
        function = %task.task.function,
        ok = result.is_ok(),
        elapsed_ms = duration.as_millis() as u64,
        "compute task finished"
    );
    if let Err(mpsc::error::SendError(late)) = completions.send(Completion {
        task,
        result,
        duration,
    }) {
        tracing::debug!(key = %late.task.key, "completion discarded, dispatcher gone");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
