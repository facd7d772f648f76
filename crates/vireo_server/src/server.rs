//! Shared server state: the outbound response queue, the wake-up pipe that
//! lets any thread nudge the event loop, and the write-once-wins error/
//! shutdown flags.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::unix::pipe;

use vireo_logging::Logger;
use vireo_worker::ResponseSink;

/// Byte written to the wake pipe when a worker has queued a response the
/// event loop should flush.
pub const WAKE_RESPONSE: u8 = b'R';
/// Byte written to the wake pipe when a shutdown has been requested.
pub const WAKE_SHUTDOWN: u8 = b'S';

/// The event loop's half of the wake channel, registered with `mio::Poll`.
pub struct WakeReceiver {
    pub receiver: pipe::Receiver,
}

/// A cheaply-clonable handle any thread can use to nudge the event loop.
#[derive(Clone)]
pub struct WakePipe {
    sender: Arc<Mutex<pipe::Sender>>,
}

impl WakePipe {
    pub fn notify_response(&self) {
        self.write_byte(WAKE_RESPONSE);
    }

    pub fn notify_shutdown(&self) {
        self.write_byte(WAKE_SHUTDOWN);
    }

    fn write_byte(&self, byte: u8) {
        let mut sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let _ = sender.write_all(&[byte]);
    }
}

/// Builds the pipe pair used to wake the event loop from worker threads
/// and the signal watcher.
pub fn wake_pipe() -> std::io::Result<(WakePipe, WakeReceiver)> {
    let (sender, receiver) = pipe::new()?;
    Ok((
        WakePipe { sender: Arc::new(Mutex::new(sender)) },
        WakeReceiver { receiver },
    ))
}

/// Per-connection outbound byte queue, drained by the event loop whenever
/// a connection's descriptor is writable.
#[derive(Default)]
pub struct OutboundQueue {
    queues: Mutex<HashMap<i64, VecDeque<Vec<u8>>>>,
}

impl OutboundQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, connection_id: i64, bytes: Vec<u8>) {
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.entry(connection_id).or_default().push_back(bytes);
    }

    /// Pops the next queued chunk for `connection_id`, if any.
    pub fn pop(&self, connection_id: i64) -> Option<Vec<u8>> {
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        let queue = queues.get_mut(&connection_id)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            queues.remove(&connection_id);
        }
        next
    }

    pub fn has_pending(&self, connection_id: i64) -> bool {
        let queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.get(&connection_id).map(|q| !q.is_empty()).unwrap_or(false)
    }

    pub fn drop_connection(&self, connection_id: i64) {
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.remove(&connection_id);
    }
}

/// Delivers a worker's response into the outbound queue and wakes the
/// event loop to flush it; the `ResponseSink` capability workers hold.
pub struct QueueResponseSink {
    outbound: Arc<OutboundQueue>,
    wake: WakePipe,
}

impl QueueResponseSink {
    pub fn new(outbound: Arc<OutboundQueue>, wake: WakePipe) -> Self {
        Self { outbound, wake }
    }
}

impl ResponseSink for QueueResponseSink {
    fn send_response(&self, connection_id: i64, bytes: Vec<u8>) {
        self.outbound.push(connection_id, bytes);
        self.wake.notify_response();
    }
}

/// Process-wide state outside any single connection: the write-once-wins
/// fatal error and the shutdown flag the signal watcher and event loop both
/// consult.
pub struct ServerState {
    shutting_down: AtomicBool,
    error: Mutex<Option<String>>,
    logger: Arc<Logger>,
}

impl ServerState {
    pub fn new(logger: Arc<Logger>) -> Arc<Self> {
        Arc::new(Self {
            shutting_down: AtomicBool::new(false),
            error: Mutex::new(None),
            logger,
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Records the first fatal error only; subsequent calls are no-ops so
    /// the earliest, most-actionable failure is the one that's kept.
    pub fn set_sys_error(&self, text: impl Into<String>) {
        let mut error = self.error.lock().unwrap_or_else(|p| p.into_inner());
        if error.is_none() {
            let text = text.into();
            self.logger.fatal(&text);
            *error = Some(text);
            self.shutting_down.store(true, Ordering::SeqCst);
        }
    }

    /// Same as `set_sys_error`, but appends `strerror(errno_value)` the way
    /// the original `Logger::sys_error` does for a failed syscall.
    pub fn set_sys_error_errno(&self, text: &str, errno_value: i32) {
        let mut error = self.error.lock().unwrap_or_else(|p| p.into_inner());
        if error.is_none() {
            self.logger.sys_error(text, errno_value);
            *error = Some(text.to_string());
            self.shutting_down.store(true, Ordering::SeqCst);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
