//! Extracts discrete length-prefixed messages from a connection's read buffer.
//!
//! Grounded in the length-prefixed line protocol of the original
//! `xappy-server` dispatcher (`dispatch_request`/`build_message`): a decimal
//! length, a space, then `msgid SP target SP payload` packed into exactly
//! that many bytes. Malformed framing resyncs to the next CR or LF.

use crate::error::ProtocolError;
use crate::message::Message;

/// Maximum number of decimal digits accepted in the length prefix (10^9 - 1
/// byte cap). A prefix with more digits than this is itself malformed and
/// triggers a resync, per spec.
pub const MAX_MSG_LEN_LEN: usize = 9;

/// Callback surface the framer drives while it walks a connection's buffer.
/// Kept minimal and connection-agnostic; the dispatcher that owns routing
/// and worker dispatch implements this.
pub trait FrameSink {
    /// Route one fully-parsed message.
    fn route(&mut self, connection_id: i64, msg: Message);

    /// Malformed framing was encountered; emit a fatal-status response.
    fn send_fatal_error(&mut self, connection_id: i64, text: &str);
}

/// Extract and route as many complete messages as `buf` currently contains.
///
/// Returns `true` if at least one message was routed. On return, `buf`
/// contains only the unconsumed tail (an in-progress message, or nothing).
pub fn dispatch_request<S: FrameSink>(sink: &mut S, connection_id: i64, buf: &mut Vec<u8>) -> bool {
    let mut pos = 0usize;
    let size = buf.len();
    let mut start = 0usize;
    let mut found = false;

    loop {
        // Skip leading whitespace between messages.
        while pos < size && buf[pos].is_ascii_whitespace() {
            pos += 1;
        }
        start = pos;

        // Read at most MAX_MSG_LEN_LEN ASCII digits.
        let mut msglen: usize = 0;
        let digit_limit = (start + MAX_MSG_LEN_LEN).min(size);
        while pos < digit_limit && buf[pos].is_ascii_digit() {
            msglen = msglen * 10 + (buf[pos] - b'0') as usize;
            pos += 1;
        }

        if pos >= size {
            // Ran out of buffer mid-length (or mid-whitespace); need more data.
            break;
        }

        // A length prefix that didn't terminate within MAX_MSG_LEN_LEN
        // digits (i.e. a digit still follows at the digit_limit boundary)
        // is itself malformed and resyncs.
        let overlong = pos == digit_limit && pos < size && buf[pos].is_ascii_digit();

        if overlong || buf[pos] != b' ' {
            match find_line_break(buf, pos) {
                Some(line_end) => {
                    let err = if overlong {
                        ProtocolError::LengthPrefixTooLong { max: MAX_MSG_LEN_LEN }
                    } else {
                        ProtocolError::LengthPrefixNotTerminated
                    };
                    sink.send_fatal_error(connection_id, &err.to_string());
                    start = line_end + 1;
                    pos = start;
                    continue;
                }
                None => break,
            }
        }

        let sp_pos = pos;
        let body_start = sp_pos + 1;

        if body_start + msglen > size {
            // Not enough data yet; leave the tail for the next read.
            pos = start;
            break;
        }

        let body = &buf[body_start..body_start + msglen];
        match split_body(body) {
            Ok((msgid, target, payload)) => {
                let msg = Message::new(connection_id, msgid, target, payload.to_vec());
                sink.route(connection_id, msg);
                found = true;
            }
            Err(err) => {
                sink.send_fatal_error(connection_id, &err.to_string());
            }
        }

        pos = body_start + msglen;
        start = pos;
    }

    if start != 0 {
        buf.drain(0..start);
    }
    found
}

fn find_line_break(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].iter().position(|&b| b == b'\n' || b == b'\r').map(|i| from + i)
}

fn split_body(body: &[u8]) -> Result<(String, String, &[u8]), ProtocolError> {
    let first_sp = body.iter().position(|&b| b == b' ').ok_or(ProtocolError::MissingMsgidSeparator)?;
    let rest = &body[first_sp + 1..];
    let second_sp = rest.iter().position(|&b| b == b' ').ok_or(ProtocolError::MissingTargetSeparator)?;

    let msgid = String::from_utf8_lossy(&body[..first_sp]).into_owned();
    let target = String::from_utf8_lossy(&rest[..second_sp]).into_owned();
    let payload = &rest[second_sp + 1..];
    Ok((msgid, target, payload))
}
