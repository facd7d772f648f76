//! Wire protocol: message framing and response encoding for the dispatch
//! server core.
//!
//! The protocol is a stream of length-prefixed frames,
//! `<declen> SP <msgid> SP <target> SP <payload>`, where `declen` counts the
//! bytes of everything after the first space. See `framer` for the parser
//! and `response` for the matching response encodings.

pub mod error;
pub mod framer;
pub mod message;
pub mod response;

pub use error::{ProtocolError, Result};
pub use framer::{dispatch_request, FrameSink, MAX_MSG_LEN_LEN};
pub use message::Message;
pub use response::{encode_error_response, encode_fatal_error, encode_msg_response, STATUS_ERROR, STATUS_FATAL, STATUS_SUCCESS};
