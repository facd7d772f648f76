//! Wire encodings for responses, fatal-errors and logical-errors.
//!
//! Response framing mirrors request framing: a decimal length prefix counts
//! the bytes of everything after the first space.

use serde_json::json;

use crate::message::Message;

pub const STATUS_SUCCESS: u8 = b'S';
pub const STATUS_ERROR: u8 = b'E';
pub const STATUS_FATAL: u8 = b'F';

/// `"<n> <msgid> <status><payload>"`, `n` counting `msgid SP status payload`.
pub fn encode_msg_response(msgid: &str, status: u8, payload: &[u8]) -> Vec<u8> {
    let n = msgid.len() + 1 + 1 + payload.len();
    let mut out = Vec::with_capacity(n + 16);
    out.extend_from_slice(n.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(msgid.as_bytes());
    out.push(b' ');
    out.push(status);
    out.extend_from_slice(payload);
    out
}

/// `"<len> SP F<json>"` — empty msgid, status `F`, connection not
/// necessarily closed (spec leaves that unimplemented).
pub fn encode_fatal_error(text: &str) -> Vec<u8> {
    let payload = json!({ "ok": 0, "msg": text }).to_string();
    encode_msg_response("", STATUS_FATAL, payload.as_bytes())
}

/// `"<len> <msgid> E<json>"`, echoing the offending message's `msgid`.
pub fn encode_error_response(msg: &Message, text: &str) -> Vec<u8> {
    let payload = json!({ "ok": 0, "msg": text }).to_string();
    encode_msg_response(&msg.msgid, STATUS_ERROR, payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_response_length_prefix_counts_from_msgid() {
        let encoded = encode_msg_response("abc", STATUS_SUCCESS, b"v1.2.3");
        let text = std::str::from_utf8(&encoded).unwrap();
        let (len_str, rest) = text.split_once(' ').unwrap();
        let declared: usize = len_str.parse().unwrap();
        assert_eq!(declared, rest.len());
        assert_eq!(rest, "abc Sv1.2.3");
    }

    #[test]
    fn fatal_error_has_empty_msgid_and_f_status() {
        let encoded = encode_fatal_error("bad framing");
        let text = std::str::from_utf8(&encoded).unwrap();
        let (_len, rest) = text.split_once(' ').unwrap();
        assert!(rest.starts_with(" F"));
        assert!(rest.contains("bad framing"));
    }

    #[test]
    fn error_response_echoes_msgid() {
        let msg = Message::new(1, "7", "Gdb/main", Vec::new());
        let encoded = encode_error_response(&msg, "Not found");
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains(" 7 E"));
    }
}
