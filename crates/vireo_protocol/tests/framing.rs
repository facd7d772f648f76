//! Integration coverage for the framer and response encoder working
//! together, as a connection's read buffer would drive them.

use anyhow::Result;
use vireo_protocol::{dispatch_request, encode_msg_response, FrameSink, Message, STATUS_SUCCESS};

#[derive(Default)]
struct Collector {
    routed: Vec<Message>,
    fatals: Vec<String>,
}

impl FrameSink for Collector {
    fn route(&mut self, _connection_id: i64, msg: Message) {
        self.routed.push(msg);
    }

    fn send_fatal_error(&mut self, _connection_id: i64, text: &str) {
        self.fatals.push(text.to_string());
    }
}

#[test]
fn a_parsed_request_round_trips_into_a_well_formed_response() -> Result<()> {
    let body = "42 Gdb/main hello";
    let mut buf = format!("{} {}", body.len(), body).into_bytes();

    let mut sink = Collector::default();
    let routed = dispatch_request(&mut sink, 1, &mut buf);
    assert!(routed);
    assert!(buf.is_empty());

    let msg = sink.routed.first().expect("one message should have been routed");
    assert_eq!(msg.msgid, "42");
    assert_eq!(msg.target, "Gdb/main");
    assert_eq!(msg.payload, b"hello");

    let response = encode_msg_response(&msg.msgid, STATUS_SUCCESS, b"ok");
    let text = std::str::from_utf8(&response)?;
    let (declared_len, rest) = text.split_once(' ').unwrap();
    assert_eq!(declared_len.parse::<usize>()?, rest.len());
    assert_eq!(rest, "42 Sok");

    Ok(())
}

#[test]
fn two_frames_share_a_read_and_are_routed_independently() -> Result<()> {
    let first = "1 Gversion ";
    let second = "7 Udb/logs x";
    let mut buf = format!("{} {} {} {}", first.len(), first, second.len(), second).into_bytes();

    let mut sink = Collector::default();
    dispatch_request(&mut sink, 1, &mut buf);

    assert_eq!(sink.routed.len(), 2);
    assert_eq!(sink.routed[0].target, "Gversion");
    assert_eq!(sink.routed[1].target, "Udb/logs");
    assert!(sink.fatals.is_empty());

    Ok(())
}
