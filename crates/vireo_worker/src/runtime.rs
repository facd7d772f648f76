//! One concurrent unit per worker: a private FIFO inbound queue guarded by
//! a mutex and condition variable, matching `WorkerThread` in the original
//! `src/server/worker.cc` one-to-one (the channel alternative sketched in
//! the design notes can't express "wait for stop-or-message" as a single
//! wait without pulling in a new dependency not otherwise needed here).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use vireo_logging::Logger;
use vireo_protocol::Message;

/// Capability a worker pool implements to be told about message completion
/// and worker exit. Calls happen from the worker's own thread, with the
/// worker's mutex *not* held (see `WorkerContext::wait_for_message`).
pub trait PoolCallbacks: Send + Sync {
    fn worker_message_handled(&self, worker_id: u64, ready_to_exit: bool);
    fn worker_exited(&self, worker_id: u64);
}

/// Capability a worker uses to deliver a response for a connection.
pub trait ResponseSink: Send + Sync {
    fn send_response(&self, connection_id: i64, bytes: Vec<u8>);
}

struct QueueState {
    stop_requested: bool,
    messages: VecDeque<Message>,
}

struct Shared {
    mutex: Mutex<QueueState>,
    condvar: Condvar,
}

/// The two runtime-provided operations a worker body consumes, injected at
/// construction rather than via inheritance.
pub struct WorkerContext {
    worker_id: u64,
    shared: Arc<Shared>,
    pool: Arc<dyn PoolCallbacks>,
    response_sink: Arc<dyn ResponseSink>,
    had_message: std::cell::Cell<bool>,
}

impl WorkerContext {
    /// Blocks until a message is available or a stop has been requested.
    /// `None` means the worker must finalize.
    ///
    /// Before blocking, if a prior message was handled, tells the pool
    /// *without* holding this worker's mutex — the pool may have enqueued
    /// more work since and knows `ready_to_exit` can be stale.
    pub fn wait_for_message(&self, ready_to_exit: bool) -> Option<Message> {
        if self.had_message.get() {
            self.pool.worker_message_handled(self.worker_id, ready_to_exit);
        } else {
            self.had_message.set(true);
        }

        let mut state = self.shared.mutex.lock().unwrap_or_else(|p| p.into_inner());
        while !state.stop_requested && state.messages.is_empty() {
            state = self.shared.condvar.wait(state).unwrap_or_else(|p| p.into_inner());
        }
        if state.stop_requested {
            return None;
        }
        state.messages.pop_front()
    }

    pub fn send_response(&self, connection_id: i64, bytes: Vec<u8>) {
        self.response_sink.send_response(connection_id, bytes);
    }
}

/// The controller-facing half: what the pool holds and drives. Cheap to
/// clone (an `Arc` around the shared queue state plus the join handle).
pub struct WorkerHandle {
    id: u64,
    group: String,
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Spawns the worker's thread, runs `run()` to completion (or until
    /// stopped), calls `cleanup()`, then notifies `pool.worker_exited`.
    pub fn start(
        id: u64,
        group: String,
        mut worker: Box<dyn crate::contract::Worker>,
        pool: Arc<dyn PoolCallbacks>,
        response_sink: Arc<dyn ResponseSink>,
        logger: Arc<Logger>,
    ) -> Self {
        let shared = Arc::new(Shared {
            mutex: Mutex::new(QueueState {
                stop_requested: false,
                messages: VecDeque::new(),
            }),
            condvar: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_pool = Arc::clone(&pool);
        let thread_logger = Arc::clone(&logger);
        let thread_id = id;

        let join_handle = std::thread::Builder::new()
            .name(format!("worker-{id}-{group}"))
            .spawn(move || {
                thread_logger.debug(&format!("worker {thread_id} starting"));
                let ctx = WorkerContext {
                    worker_id: thread_id,
                    shared: thread_shared,
                    pool: Arc::clone(&thread_pool),
                    response_sink,
                    had_message: std::cell::Cell::new(false),
                };
                worker.run(&ctx);
                worker.cleanup();
                thread_pool.worker_exited(thread_id);
                thread_logger.debug(&format!("worker {thread_id} stopped"));
            })
            .expect("failed to spawn worker thread");

        Self {
            id,
            group,
            shared,
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn send_message(&self, msg: Message) {
        let mut state = self.shared.mutex.lock().unwrap_or_else(|p| p.into_inner());
        state.messages.push_back(msg);
        self.shared.condvar.notify_one();
    }

    /// Idempotent: setting `stop_requested` twice has no additional effect.
    pub fn stop(&self) {
        let mut state = self.shared.mutex.lock().unwrap_or_else(|p| p.into_inner());
        if !state.stop_requested {
            state.stop_requested = true;
            self.shared.condvar.notify_all();
        }
    }

    /// Idempotent: a second call after the handle has already joined is a
    /// no-op.
    pub fn join(&self) {
        let handle = self.join_handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
