//! The worker pool: creates workers per routing group, keeps the
//! `workers` / `exiting` / `exited` lifecycle, and retries messages when
//! a group is already at its worker cap.
//!
//! Grounded in `workerpool.h` (authoritative `src/server` variant) for the
//! lifecycle and locking discipline, and in `casparian_sentinel::Sentinel`'s
//! `workers: HashMap<..>` plus its periodic stale-entry reap for how a
//! "finished but not yet joined" worker is carried until something off its
//! own thread can safely join it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use vireo_logging::Logger;
use vireo_protocol::Message;
use vireo_worker::{PoolCallbacks, ResponseSink, Worker, WorkerHandle};

pub const DEFAULT_MAX_WORKERS_PER_GROUP: usize = 4;
const RETRY_QUEUE_CAP: usize = 256;

/// Builds a worker body for a given routing group. Owned by the dispatcher
/// and handed to the pool so the pool stays ignorant of search/indexer
/// bodies.
pub type WorkerFactory = dyn Fn(&str) -> Box<dyn Worker> + Send + Sync;

/// Resolves the worker cap for a routing group (the CLI's distinct
/// `--searchers`/`--updaters` counts apply to different groups).
pub type GroupCap = dyn Fn(&str) -> usize + Send + Sync;

/// Mirrors the spec's `WorkerDetails`: per-worker load tracking the pool
/// uses to pick an idle worker before spinning up a new one.
struct WorkerEntry {
    handle: Arc<WorkerHandle>,
    group: String,
    in_flight: usize,
    ready_to_exit: bool,
}

struct PoolState {
    next_worker_id: u64,
    /// Primary registry: active workers currently eligible for dispatch.
    workers: HashMap<u64, WorkerEntry>,
    by_group: HashMap<String, Vec<u64>>,
    /// Workers `stop()` has told to finalize but that haven't reported
    /// `worker_exited` yet. Disjoint from `workers` at every lock release.
    exiting: HashMap<u64, Arc<WorkerHandle>>,
    /// Workers that have finished `run()`/`cleanup()` and are waiting to be
    /// joined by `join()`. Disjoint from both `workers` and `exiting`.
    exited: Vec<(u64, Arc<WorkerHandle>)>,
    retry_queues: HashMap<String, VecDeque<Message>>,
}

pub struct WorkerPool {
    state: Mutex<PoolState>,
    max_workers_per_group: Arc<GroupCap>,
    factory: Arc<WorkerFactory>,
    response_sink: Arc<dyn ResponseSink>,
    logger: Arc<Logger>,
}

impl WorkerPool {
    pub fn new(
        max_workers_per_group: Arc<GroupCap>,
        factory: Arc<WorkerFactory>,
        response_sink: Arc<dyn ResponseSink>,
        logger: Arc<Logger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                next_worker_id: 1,
                workers: HashMap::new(),
                by_group: HashMap::new(),
                exiting: HashMap::new(),
                exited: Vec::new(),
                retry_queues: HashMap::new(),
            }),
            max_workers_per_group,
            factory,
            response_sink,
            logger,
        })
    }

    /// Convenience constructor for a single uniform cap across every group.
    pub fn with_uniform_cap(
        max_workers_per_group: usize,
        factory: Arc<WorkerFactory>,
        response_sink: Arc<dyn ResponseSink>,
        logger: Arc<Logger>,
    ) -> Arc<Self> {
        Self::new(Arc::new(move |_group: &str| max_workers_per_group), factory, response_sink, logger)
    }

    /// Routes `msg` to the first idle (`in_flight == 0`) worker in `group`,
    /// spins one up if none is idle and the group is under its cap, or
    /// queues it (dropping the oldest queued entry past the bound) if the
    /// group is at its cap with every worker busy.
    pub fn send_to_worker(self: &Arc<Self>, group: &str, msg: Message) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(id) = self.pick_idle_worker(&state, group) {
            let entry = state.workers.get_mut(&id).expect("id came from workers map");
            entry.in_flight += 1;
            entry.ready_to_exit = false;
            let handle = entry.handle.clone();
            drop(state);
            handle.send_message(msg);
            return;
        }

        let in_group = state.by_group.get(group).map(Vec::len).unwrap_or(0);
        if in_group >= (self.max_workers_per_group)(group) {
            self.enqueue_retry(&mut state, group, msg);
            return;
        }

        let id = state.next_worker_id;
        state.next_worker_id += 1;
        drop(state);

        let worker_body = (self.factory)(group);
        let pool_callbacks: Arc<dyn PoolCallbacks> = self.clone();
        let handle = Arc::new(WorkerHandle::start(
            id,
            group.to_string(),
            worker_body,
            pool_callbacks,
            self.response_sink.clone(),
            self.logger.clone(),
        ));

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.workers.insert(
            id,
            WorkerEntry { handle: handle.clone(), group: group.to_string(), in_flight: 1, ready_to_exit: false },
        );
        state.by_group.entry(group.to_string()).or_default().push(id);
        drop(state);

        handle.send_message(msg);
    }

    /// Selects the first non-exiting worker in `group` with no outstanding
    /// work, per spec.md §4.6 step 2 ("select the first with `in_flight ==
    /// 0`").
    fn pick_idle_worker(&self, state: &PoolState, group: &str) -> Option<u64> {
        let ids = state.by_group.get(group)?;
        ids.iter()
            .find(|id| !state.exiting.contains_key(id) && state.workers.get(id).map(|e| e.in_flight == 0).unwrap_or(false))
            .copied()
    }

    fn enqueue_retry(&self, state: &mut PoolState, group: &str, msg: Message) {
        let queue = state.retry_queues.entry(group.to_string()).or_default();
        if queue.len() >= RETRY_QUEUE_CAP {
            if let Some(dropped) = queue.pop_front() {
                self.logger.error(&format!(
                    "worker group '{group}' is at its cap and its retry queue is full; dropping queued message {}",
                    dropped.msgid
                ));
            }
        }
        queue.push_back(msg);
    }

    /// Drain-initiate (spec.md §4.6 `stop()`): moves every currently active
    /// worker out of the primary registry and into `exiting`, signalling
    /// each to stop. Does not block on any individual worker finishing.
    pub fn stop(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let ids: Vec<u64> = state.workers.keys().copied().collect();
        for id in ids {
            if let Some(entry) = state.workers.remove(&id) {
                entry.handle.stop();
                state.exiting.insert(id, entry.handle);
            }
        }
        state.by_group.clear();
    }

    /// Drain-complete (spec.md §4.6 `join()`): blocks until every worker in
    /// `exiting` has been joined, then drains whatever `worker_exited` has
    /// queued onto `exited` in the meantime (a worker may self-report its
    /// exit, moving itself from `exiting` to `exited`, while this function
    /// is blocked joining it — `WorkerHandle::join` is idempotent, so
    /// joining the same worker from both phases is harmless). Returns the
    /// number of workers joined.
    pub fn join(self: &Arc<Self>) -> usize {
        let mut joined = 0usize;

        loop {
            let next = {
                let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                state.exiting.iter().next().map(|(id, handle)| (*id, handle.clone()))
            };
            let Some((id, handle)) = next else { break };

            handle.join();
            joined += 1;

            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.exiting.remove(&id);
        }

        let pending = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut state.exited)
        };
        for (_id, handle) in pending {
            handle.join();
            joined += 1;
        }

        joined
    }

    /// Requests every known worker to stop, then blocks until all have
    /// exited and been joined. Used only during final shutdown.
    pub fn stop_and_join_all(self: &Arc<Self>) {
        self.stop();
        self.join();
    }

    pub fn worker_count(&self, group: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.by_group.get(group).map(Vec::len).unwrap_or(0)
    }

    pub fn total_workers(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.workers.len()
    }

    pub fn retry_queue_len(&self, group: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.retry_queues.get(group).map(VecDeque::len).unwrap_or(0)
    }
}

impl PoolCallbacks for WorkerPool {
    /// Decrements the worker's in-flight count (per spec.md §4.6's
    /// `worker_message_handled`) and, if a message was retry-queued for
    /// this group while every worker was busy, hands the now-idle worker
    /// the next one immediately rather than waiting for a fresh
    /// `send_to_worker` call to find it.
    fn worker_message_handled(&self, worker_id: u64, ready_to_exit: bool) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let Some(entry) = state.workers.get_mut(&worker_id) else { return };
        assert!(entry.in_flight > 0, "worker_message_handled called more often than messages were sent");
        entry.in_flight -= 1;
        if entry.in_flight == 0 && ready_to_exit {
            entry.ready_to_exit = true;
        }
        let group = entry.group.clone();
        let handle = entry.handle.clone();

        let queued = state.retry_queues.get_mut(&group).and_then(VecDeque::pop_front);
        let Some(queued) = queued else { return };

        let entry = state.workers.get_mut(&worker_id).expect("worker still registered");
        entry.in_flight += 1;
        entry.ready_to_exit = false;
        drop(state);

        handle.send_message(queued);
    }

    /// A worker's own thread reporting that `run()`/`cleanup()` have
    /// finished. Per spec.md §4.6: if `w` is still in the primary registry
    /// (it exited on its own, without `stop()` ever being called), remove
    /// it from both `workers` and `by_group`; if `stop()` already moved it
    /// into `exiting`, remove it from there instead. Either way its handle
    /// ends up in `exited` for `join()` to pick up.
    fn worker_exited(&self, worker_id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let handle = if let Some(entry) = state.workers.remove(&worker_id) {
            for ids in state.by_group.values_mut() {
                ids.retain(|id| *id != worker_id);
            }
            entry.handle
        } else if let Some(handle) = state.exiting.remove(&worker_id) {
            handle
        } else {
            return;
        };

        state.exited.push((worker_id, handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;
    impl ResponseSink for NullSink {
        fn send_response(&self, _connection_id: i64, _bytes: Vec<u8>) {}
    }

    struct EchoWorker;
    impl Worker for EchoWorker {
        fn run(&mut self, ctx: &vireo_worker::WorkerContext) {
            while let Some(msg) = ctx.wait_for_message(true) {
                ctx.send_response(msg.connection_id, msg.payload.clone());
            }
        }
    }

    fn test_pool(max_per_group: usize) -> (Arc<WorkerPool>, Arc<AtomicUsize>) {
        let spawned = Arc::new(AtomicUsize::new(0));
        let spawned_clone = spawned.clone();
        let factory: Arc<WorkerFactory> = Arc::new(move |_group: &str| {
            spawned_clone.fetch_add(1, Ordering::SeqCst);
            Box::new(EchoWorker) as Box<dyn Worker>
        });
        let pool = WorkerPool::with_uniform_cap(max_per_group, factory, Arc::new(NullSink), Arc::new(Logger::new(None)));
        (pool, spawned)
    }

    #[test]
    fn reuses_existing_worker_once_it_goes_idle() {
        // Scenario 5 in spec.md §8: a second request to the same group,
        // sent only after the first has been acknowledged as handled,
        // finds the existing idle worker rather than spinning up another.
        let (pool, spawned) = test_pool(4);
        pool.send_to_worker("search", Message::new(1, "a", "Gdb/x", Vec::new()));
        std::thread::sleep(std::time::Duration::from_millis(30));
        pool.send_to_worker("search", Message::new(2, "b", "Gdb/x", Vec::new()));
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(pool.worker_count("search"), 1);
        pool.stop_and_join_all();
    }

    #[test]
    fn spins_up_a_second_worker_when_the_first_is_still_busy() {
        // If the only existing worker in the group has `in_flight > 0`
        // (it hasn't acknowledged its current message yet) and the group
        // is under its cap, a concurrent request gets its own worker
        // rather than waiting behind the busy one.
        struct BlockingWorker {
            gate: Arc<std::sync::Barrier>,
        }
        impl Worker for BlockingWorker {
            fn run(&mut self, ctx: &vireo_worker::WorkerContext) {
                while let Some(_msg) = ctx.wait_for_message(true) {
                    self.gate.wait();
                }
            }
        }

        let spawned = Arc::new(AtomicUsize::new(0));
        let spawned_clone = spawned.clone();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let gate_clone = gate.clone();
        let factory: Arc<WorkerFactory> = Arc::new(move |_group: &str| {
            spawned_clone.fetch_add(1, Ordering::SeqCst);
            Box::new(BlockingWorker { gate: gate_clone.clone() }) as Box<dyn Worker>
        });
        let pool = WorkerPool::with_uniform_cap(2, factory, Arc::new(NullSink), Arc::new(Logger::new(None)));

        pool.send_to_worker("search", Message::new(1, "a", "Gdb/x", Vec::new()));
        // Give the first worker's thread time to pick up the message and
        // block on the gate, so it's provably still `in_flight == 1`.
        std::thread::sleep(std::time::Duration::from_millis(30));
        pool.send_to_worker("search", Message::new(2, "b", "Gdb/x", Vec::new()));
        std::thread::sleep(std::time::Duration::from_millis(30));

        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(pool.worker_count("search"), 2);

        // The second worker hitting the two-party barrier releases both;
        // no extra signal from the test thread is needed.
        pool.stop_and_join_all();
    }

    #[test]
    fn caps_workers_per_group_and_queues_overflow() {
        let (pool, spawned) = test_pool(1);
        pool.send_to_worker("search", Message::new(1, "a", "Gdb/x", Vec::new()));
        pool.send_to_worker("search", Message::new(2, "b", "Gdb/x", Vec::new()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(pool.worker_count("search"), 1);
        pool.stop_and_join_all();
    }

    #[test]
    fn queued_message_is_delivered_once_the_worker_goes_idle() {
        struct RecordingSink {
            seen: Mutex<Vec<Vec<u8>>>,
        }
        impl ResponseSink for RecordingSink {
            fn send_response(&self, _connection_id: i64, bytes: Vec<u8>) {
                self.seen.lock().unwrap().push(bytes);
            }
        }

        let factory: Arc<WorkerFactory> = Arc::new(|_group: &str| Box::new(EchoWorker) as Box<dyn Worker>);
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        let pool = WorkerPool::with_uniform_cap(1, factory, sink.clone(), Arc::new(Logger::new(None)));

        pool.send_to_worker("search", Message::new(1, "a", "Gdb/x", b"one".to_vec()));
        pool.send_to_worker("search", Message::new(1, "b", "Gdb/x", b"two".to_vec()));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(pool.retry_queue_len("search"), 0);
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(&seen[0][..], b"one");
        assert_eq!(&seen[1][..], b"two");
        drop(seen);
        pool.stop_and_join_all();
    }

    #[test]
    fn distinct_groups_get_distinct_workers() {
        let (pool, spawned) = test_pool(4);
        pool.send_to_worker("search", Message::new(1, "a", "Gdb/x", Vec::new()));
        pool.send_to_worker("indexer_x", Message::new(1, "a", "Udb/x", Vec::new()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(pool.total_workers(), 2);
        pool.stop_and_join_all();
    }
}
