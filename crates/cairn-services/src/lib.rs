//! cairn-services — the moving parts of a worker node.
//! Storage, callables, execution, remote fetch, and the transports they run on.

pub mod data_store;
pub mod executor;
pub mod fetcher;
pub mod registry;
pub mod transport;

pub use data_store::DataStore;
pub use executor::{Completion, ExecutorError, PendingTask, TaskExecutor};
pub use fetcher::{FetchError, RemoteFetcher};
pub use registry::{Callable, FunctionRegistry};
pub use transport::{
    AddressGenerator, Endpoint, Fabric, SequentialAddresses, TcpTransport, Transport, TransportError,
};
