//! A running worker node: its endpoint, store, executor and loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use cairn_core::config::WorkerConfig;
use cairn_core::message::{Locations, Registration};
use cairn_core::wire::{Address, Function, Header};
use cairn_services::{
    DataStore, Endpoint, FetchError, FunctionRegistry, RemoteFetcher, TaskExecutor, Transport,
};

use crate::dispatch::Dispatcher;
use crate::error::WorkerError;
use crate::lifecycle::{Lifecycle, State};

/// How to start a worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Receives the `register` handshake. `None` skips it.
    pub scheduler: Option<Address>,
    /// Fixed address to bind. `None` lets the transport choose.
    pub address: Option<Address>,
    pub max_concurrent_tasks: usize,
    pub fetch_timeout: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&WorkerConfig {
            scheduler: String::new(),
            ..WorkerConfig::default()
        })
    }
}

impl WorkerOptions {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| Address::from(s));
        Self {
            scheduler: non_empty(&config.scheduler),
            address: non_empty(&config.address),
            max_concurrent_tasks: config.task_slots(),
            fetch_timeout: config.fetch_timeout(),
        }
    }

    pub fn scheduler(mut self, scheduler: impl Into<Address>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }

    pub fn address(mut self, address: impl Into<Address>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

/// Handle to a running worker. Dropping it closes the worker.
pub struct Worker {
    address: Address,
    store: DataStore,
    fetcher: RemoteFetcher,
    executor: TaskExecutor,
    lifecycle: Lifecycle,
    task: Option<JoinHandle<Result<(), WorkerError>>>,
}

impl Worker {
    /// Bind an endpoint, announce it to the scheduler, and start serving.
    pub async fn start(
        transport: Arc<dyn Transport>,
        registry: Arc<FunctionRegistry>,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        let endpoint = match &options.address {
            Some(address) => transport.bind_at(address).await,
            None => transport.bind().await,
        }
        .map_err(WorkerError::Bind)?;
        let address = endpoint.address().clone();

        if let Some(scheduler) = &options.scheduler {
            register(endpoint.as_ref(), scheduler).await?;
        }

        let store = DataStore::new();
        let fetcher = RemoteFetcher::new(transport, store.clone(), options.fetch_timeout);
        let (executor, completions) = TaskExecutor::new(registry, options.max_concurrent_tasks);
        let lifecycle = Lifecycle::new();

        let dispatcher = Dispatcher::new(
            endpoint,
            store.clone(),
            fetcher.clone(),
            executor.clone(),
            completions,
            lifecycle.clone(),
        );
        let task = tokio::spawn(dispatcher.run());

        tracing::info!(
            %address,
            scheduler = ?options.scheduler.as_ref().map(Address::as_str),
            max_concurrent = executor.capacity(),
            "worker started"
        );

        Ok(Self {
            address,
            store,
            fetcher,
            executor,
            lifecycle,
            task: Some(task),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The worker's data store. Shared with the running loop.
    pub fn data(&self) -> &DataStore {
        &self.store
    }

    pub fn state(&self) -> State {
        self.lifecycle.current()
    }

    /// Pull the missing keys of `locations` from peers into this worker's store.
    ///
    /// A no-op once the worker is closing.
    pub async fn collect(&self, locations: &Locations) -> Result<usize, FetchError> {
        if self.state().is_closing() {
            tracing::debug!(address = %self.address, "collect ignored, worker closed");
            return Ok(0);
        }
        self.fetcher.collect(locations).await
    }

    /// Stop serving. Running tasks finish but their results are discarded.
    /// Calling it again does nothing.
    pub fn close(&self) {
        let executor = self.executor.clone();
        if self.lifecycle.close(|| executor.close()) {
            tracing::info!(address = %self.address, "worker closing");
        }
    }

    /// Resolves once the worker is closed, by `close` or by a `close` message.
    pub async fn closed(&self) {
        self.lifecycle.closed().await;
    }

    /// Wait for the dispatch loop to exit and report why it did.
    pub async fn join(mut self) -> Result<(), WorkerError> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
    }
}

async fn register(endpoint: &dyn Endpoint, scheduler: &Address) -> Result<(), WorkerError> {
    let address = endpoint.address().clone();
    let header = Header::new(Function::Register).with_address(address.clone());
    let payload = header.payload_codec().encode(&Registration { address })?;

    endpoint
        .send(scheduler, header.encode()?, payload)
        .await
        .map_err(|source| WorkerError::Handshake {
            scheduler: scheduler.clone(),
            source,
        })?;
    tracing::debug!(%scheduler, "registration sent");
    Ok(())
}
