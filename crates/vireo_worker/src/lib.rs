//! The polymorphic worker capability and its per-worker runtime.
//!
//! Split across two modules so the contract a worker body implements
//! (`contract::Worker`) stays decoupled from the concurrency machinery
//! (`runtime::WorkerHandle`/`WorkerContext`) that drives it.

pub mod contract;
pub mod runtime;

pub use contract::Worker;
pub use runtime::{PoolCallbacks, ResponseSink, WorkerContext, WorkerHandle};
