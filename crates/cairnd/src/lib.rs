//! cairnd — the worker node.
//! A `Worker` binds one endpoint, serves store and compute requests on it,
//! and runs tasks through the services crate.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod worker;

pub use error::WorkerError;
pub use lifecycle::State;
pub use worker::{Worker, WorkerOptions};
