//! Protocol error types: the ways a single frame can be malformed. These
//! never cross a connection boundary as a Rust `Result` — the framer turns
//! them into `Display` text for `FrameSink::send_fatal_error`, since a bad
//! frame is data the peer needs to hear about, not a failure to propagate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message length prefix exceeds {max} digits")]
    LengthPrefixTooLong { max: usize },

    #[error("malformed message length")]
    LengthPrefixNotTerminated,

    #[error("malformed message: missing msgid/target separator")]
    MissingMsgidSeparator,

    #[error("malformed message: missing target/payload separator")]
    MissingTargetSeparator,
}
