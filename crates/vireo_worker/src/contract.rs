//! The polymorphic worker capability.
//!
//! A worker implements `run`/`cleanup`; it consumes two runtime-provided
//! operations (`wait_for_message`, `send_response`) through `WorkerContext`
//! rather than through inheritance, per the "pass a vtable-like record
//! explicitly" guidance: the trait itself only names what the worker body
//! *implements*.

use crate::runtime::WorkerContext;

pub trait Worker: Send {
    /// Runs until `wait_for_message` returns `None` (stop requested).
    fn run(&mut self, ctx: &WorkerContext);

    /// Called once after `run` returns, before the pool is told the worker
    /// has exited. Default no-op, matching the original `Worker::cleanup`.
    fn cleanup(&mut self) {}
}
