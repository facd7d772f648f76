//! A minimal stand-in worker body used by the `vireo_server` binary.
//!
//! Concrete search/index worker bodies are out of scope for this crate —
//! they belong to whatever backend embeds the framework. This one just
//! echoes each request's payload back to its connection, which is enough
//! to exercise the full dispatch/worker-pool/event-loop path end to end.

use vireo_protocol::response::{encode_msg_response, STATUS_SUCCESS};
use vireo_worker::{Worker, WorkerContext};

pub struct EchoSearchWorker {
    group: String,
}

impl EchoSearchWorker {
    pub fn new(group: String) -> Self {
        Self { group }
    }
}

impl Worker for EchoSearchWorker {
    fn run(&mut self, ctx: &WorkerContext) {
        while let Some(msg) = ctx.wait_for_message(true) {
            let bytes = encode_msg_response(&msg.msgid, STATUS_SUCCESS, &msg.payload);
            ctx.send_response(msg.connection_id, bytes);
        }
    }

    fn cleanup(&mut self) {
        let _ = &self.group;
    }
}
