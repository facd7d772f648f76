//! Typed, PID/thread-tagged append-only log sink.
//!
//! One operation, `log(level, text)`, writing a single line
//! `"<tag><pid>.<tid>: <text>\n"` per call. The log file is opened lazily on
//! first write and writes are serialized at line granularity so the sink is
//! safe to call from any thread, including worker threads and the event
//! loop. Failure to open or write never propagates — it goes to the
//! process's stderr instead, matching the original `Logger::log`'s
//! "never throws" contract.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Log levels, in the order the original assigns tag letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Debug,
    Error,
    SysError,
    Fatal,
}

impl Level {
    fn tag(self) -> u8 {
        match self {
            Level::Info => b'I',
            Level::Debug => b'D',
            Level::Error => b'E',
            Level::SysError => b'S',
            Level::Fatal => b'F',
        }
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = Cell::new(0);
}

fn thread_id() -> u64 {
    THREAD_ID.with(|cell| {
        let current = cell.get();
        if current != 0 {
            return current;
        }
        let assigned = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        cell.set(assigned);
        assigned
    })
}

struct LoggerState {
    filename: Option<PathBuf>,
    file: Option<File>,
}

/// An append-only, lazily-opened log file sink.
pub struct Logger {
    state: Mutex<LoggerState>,
}

impl Logger {
    /// `filename = None` means logging is a no-op (matches the original's
    /// "empty filename" behavior).
    pub fn new(filename: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LoggerState { filename, file: None }),
        }
    }

    pub fn info(&self, text: &str) {
        self.log(Level::Info, text);
    }

    pub fn debug(&self, text: &str) {
        self.log(Level::Debug, text);
    }

    pub fn error(&self, text: &str) {
        self.log(Level::Error, text);
    }

    pub fn fatal(&self, text: &str) {
        self.log(Level::Fatal, text);
    }

    /// `errno_value` is a snapshot the caller took at the point of failure
    /// (taking `errno` fresh here would race with whatever ran in between).
    pub fn sys_error(&self, text: &str, errno_value: i32) {
        let with_errno = format!("{}: {}", text, std::io::Error::from_raw_os_error(errno_value));
        self.log(Level::SysError, &with_errno);
    }

    pub fn log(&self, level: Level, text: &str) {
        let pid = std::process::id();
        let tid = thread_id();
        let mut line = Vec::with_capacity(text.len() + 32);
        line.push(level.tag());
        line.extend_from_slice(pid.to_string().as_bytes());
        line.push(b'.');
        line.extend_from_slice(tid.to_string().as_bytes());
        line.extend_from_slice(b": ");
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.file.is_none() {
            let Some(path) = state.filename.clone() else {
                return;
            };
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => state.file = Some(file),
                Err(e) => {
                    eprintln!("Can't open log file at {}: {}", path.display(), e);
                    return;
                }
            }
        }

        if let Some(file) = state.file.as_mut() {
            if let Err(e) = file.write_all(&line) {
                let path = state.filename.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                eprintln!("Can't write to log file at {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn writes_one_line_with_expected_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let logger = Logger::new(Some(path.clone()));
        logger.info("starting server");

        let contents = fs::read_to_string(&path).unwrap();
        let pid = std::process::id();
        assert!(contents.starts_with(&format!("I{}.", pid)));
        assert!(contents.trim_end().ends_with(": starting server"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn sys_error_appends_strerror() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let logger = Logger::new(Some(path.clone()));
        logger.sys_error("read failed", libc::EINTR);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("read failed: "));
        assert!(contents.starts_with("S"));
    }

    #[test]
    fn no_filename_is_a_silent_no_op() {
        let logger = Logger::new(None);
        logger.info("should not panic");
    }

    #[test]
    fn concurrent_writers_each_get_a_complete_line() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let logger = Arc::new(Logger::new(Some(path.clone())));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = Arc::clone(&logger);
                thread::spawn(move || {
                    for _ in 0..50 {
                        logger.info(&format!("line from {i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 400);
        for line in contents.lines() {
            assert!(line.starts_with('I'));
        }
    }
}
