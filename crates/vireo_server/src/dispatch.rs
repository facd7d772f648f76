//! Routes parsed messages to the right worker group, or answers them
//! directly when no worker is needed.
//!
//! Grounded in `original_source/src/xappy/dispatch.cc`'s `route_message`,
//! generalized from its `"echo"`/`"search"` special cases to the fuller
//! route table: `Gversion` answered inline, `G` + `db/<name>` routed to the
//! `"search"` group, `U` + `db/<name>` routed to a per-database
//! `"indexer_<name>"` group.

use std::sync::Arc;

use vireo_protocol::framer::FrameSink;
use vireo_protocol::message::Message;
use vireo_protocol::response::{encode_error_response, encode_fatal_error, encode_msg_response, STATUS_SUCCESS};
use vireo_worker::ResponseSink;

use crate::pool::WorkerPool;

pub struct SearchDispatcher {
    version: String,
    pool: Arc<WorkerPool>,
    response_sink: Arc<dyn ResponseSink>,
}

impl SearchDispatcher {
    pub fn new(version: impl Into<String>, pool: Arc<WorkerPool>, response_sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            version: version.into(),
            pool,
            response_sink,
        }
    }

    fn send(&self, connection_id: i64, bytes: Vec<u8>) {
        self.response_sink.send_response(connection_id, bytes);
    }

    /// Maps a message's target to the worker group that should handle it.
    /// `Ok(None)` means answered inline (`Gversion`). `Err(text)` means
    /// unroutable, with the spec.md §4.8 payload text to send back:
    /// an unrecognized method byte is `"Invalid message"`, a recognized
    /// method with an unmatched path is `"Not found"`.
    fn group_for(&self, msg: &Message) -> Result<Option<String>, &'static str> {
        match msg.method() {
            Some(b'G') => {
                let parts = msg.path_components();
                if parts.first().copied() == Some("version") {
                    Ok(None)
                } else if parts.first().copied() == Some("db") && parts.len() >= 2 {
                    Ok(Some("search".to_string()))
                } else {
                    Err("Not found")
                }
            }
            Some(b'U') => {
                let parts = msg.path_components();
                if parts.first().copied() == Some("db") && parts.len() >= 2 {
                    Ok(Some(format!("indexer_{}", parts[1])))
                } else {
                    Err("Not found")
                }
            }
            _ => Err("Invalid message"),
        }
    }
}

impl FrameSink for SearchDispatcher {
    fn route(&mut self, connection_id: i64, msg: Message) {
        if msg.method() == Some(b'G') && msg.path_components().first().copied() == Some("version") {
            let bytes = encode_msg_response(&msg.msgid, STATUS_SUCCESS, self.version.as_bytes());
            self.send(connection_id, bytes);
            return;
        }

        match self.group_for(&msg) {
            Ok(Some(group)) => self.pool.send_to_worker(&group, msg),
            Ok(None) => {}
            Err(text) => {
                let bytes = encode_error_response(&msg, text);
                self.send(connection_id, bytes);
            }
        }
    }

    fn send_fatal_error(&mut self, connection_id: i64, text: &str) {
        self.send(connection_id, encode_fatal_error(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerFactory;
    use std::sync::Mutex;
    use vireo_logging::Logger;
    use vireo_worker::Worker;

    struct RecordingSink {
        sent: Mutex<Vec<(i64, Vec<u8>)>>,
    }
    impl ResponseSink for RecordingSink {
        fn send_response(&self, connection_id: i64, bytes: Vec<u8>) {
            self.sent.lock().unwrap().push((connection_id, bytes));
        }
    }

    struct EchoWorker;
    impl Worker for EchoWorker {
        fn run(&mut self, ctx: &vireo_worker::WorkerContext) {
            while let Some(msg) = ctx.wait_for_message(true) {
                ctx.send_response(msg.connection_id, msg.payload.clone());
            }
        }
    }

    fn dispatcher() -> (SearchDispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink { sent: Mutex::new(Vec::new()) });
        let factory: Arc<WorkerFactory> = Arc::new(|_group: &str| Box::new(EchoWorker) as Box<dyn Worker>);
        let pool = WorkerPool::with_uniform_cap(4, factory, sink.clone() as Arc<dyn ResponseSink>, Arc::new(Logger::new(None)));
        (SearchDispatcher::new("v1.0.0", pool, sink.clone() as Arc<dyn ResponseSink>), sink)
    }

    #[test]
    fn version_query_answered_inline() {
        let (mut dispatcher, sink) = dispatcher();
        dispatcher.route(0, Message::new(0, "abc", "Gversion", Vec::new()));
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let text = std::str::from_utf8(&sent[0].1).unwrap();
        assert!(text.contains("abc S"));
        assert!(text.ends_with("v1.0.0"));
    }

    #[test]
    fn unknown_target_gets_error_response() {
        let (mut dispatcher, sink) = dispatcher();
        dispatcher.route(0, Message::new(0, "abc", "Xunknown", Vec::new()));
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let text = std::str::from_utf8(&sent[0].1).unwrap();
        assert!(text.contains("abc E"));
    }

    #[test]
    fn search_query_routes_to_worker_and_echoes_payload() {
        let (mut dispatcher, sink) = dispatcher();
        dispatcher.route(1, Message::new(1, "q1", "Gdb/main", b"hello".to_vec()));
        std::thread::sleep(std::time::Duration::from_millis(20));
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[0].1, b"hello");
    }

    #[test]
    fn fatal_error_is_encoded_with_empty_msgid() {
        let (mut dispatcher, sink) = dispatcher();
        dispatcher.send_fatal_error(0, "malformed message length");
        let sent = sink.sent.lock().unwrap();
        let text = std::str::from_utf8(&sent[0].1).unwrap();
        assert!(text.contains(" F"));
        assert!(text.contains("malformed message length"));
    }
}
