//! The single-threaded readiness loop: multiplexes connection I/O and the
//! wake-up pipe with `mio::Poll`, following the shape of
//! `pelikan-io-grow-a-cache`'s mio runtime (readable/writable dispatch,
//! register-on-accept, deregister-on-close) adapted to one thread instead
//! of a pool of worker threads, since connection state here is driven by
//! the single dispatcher rather than sharded across workers.
//!
//! Per the framework's resolution of what happens when `connections` is
//! empty: the loop keeps polling indefinitely. A TCP listener with zero
//! current clients is not a reason to exit; only an observed shutdown byte
//! on the wake pipe, or an unrecoverable I/O error, ends the loop.

use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use vireo_logging::Logger;
use vireo_protocol::framer::dispatch_request;

use crate::connection::{Connection, ReadResult};
use crate::dispatch::SearchDispatcher;
use crate::server::{OutboundQueue, ServerState, WakeReceiver, WAKE_SHUTDOWN};

const WAKE_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;
const READ_CHUNK: usize = 64 * 1024;

pub struct EventLoopConfig {
    pub stdio: bool,
    pub bind: Option<SocketAddr>,
}

/// Runs the event loop until shutdown. `dispatcher` owns routing; `state`
/// carries the shutdown flag and write-once error; `outbound` is drained
/// whenever a connection becomes writable or the wake pipe reports a new
/// response.
pub fn run(
    config: EventLoopConfig,
    mut wake: WakeReceiver,
    mut dispatcher: SearchDispatcher,
    state: &ServerState,
    outbound: &OutboundQueue,
    logger: &Logger,
) -> std::io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(128);
    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token = FIRST_CONN_TOKEN;
    let mut next_connection_id: i64 = 1;

    poll.registry().register(&mut wake.receiver, WAKE_TOKEN, Interest::READABLE)?;

    let mut listener = match config.bind {
        Some(addr) => {
            let mut listener = TcpListener::bind(addr)?;
            poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
            logger.info(&format!("listening on {addr}"));
            Some(listener)
        }
        None => None,
    };

    if config.stdio {
        let mut conn = Connection::stdio();
        let token = Token(next_token);
        next_token += 1;
        conn.register(poll.registry(), token)?;
        connections.insert(token, conn);
    }

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            state.set_sys_error(format!("poll failed: {e}"));
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                WAKE_TOKEN => {
                    if drain_wake(&mut wake, state) {
                        flush_all(&mut poll, &mut connections, outbound);
                        return Ok(());
                    }
                }
                LISTENER_TOKEN => {
                    if let Some(listener) = listener.as_mut() {
                        accept_all(listener, &mut poll, &mut connections, &mut next_token, &mut next_connection_id, logger);
                    }
                }
                token => {
                    service_connection(token, event, &mut poll, &mut connections, &mut dispatcher, outbound, logger);
                }
            }
        }

        flush_all(&mut poll, &mut connections, outbound);

        if state.is_shutting_down() && connections.is_empty() {
            return Ok(());
        }
    }
}

/// Drains every queued byte on the wake pipe; returns `true` if a shutdown
/// byte was among them (response-available bytes need no action here, the
/// outbound flush after every poll cycle already covers them).
fn drain_wake(wake: &mut WakeReceiver, state: &ServerState) -> bool {
    let mut buf = [0u8; 256];
    let mut saw_shutdown = state.is_shutting_down();
    loop {
        match wake.receiver.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if buf[..n].contains(&WAKE_SHUTDOWN) {
                    saw_shutdown = true;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    saw_shutdown
}

fn accept_all(
    listener: &mut TcpListener,
    poll: &mut Poll,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
    next_connection_id: &mut i64,
    logger: &Logger,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = *next_connection_id;
                *next_connection_id += 1;
                let token = Token(*next_token);
                *next_token += 1;

                let mut conn = Connection::tcp(id, stream);
                if conn.register(poll.registry(), token).is_ok() {
                    logger.debug(&format!("accepted connection {id} from {peer}"));
                    connections.insert(token, conn);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                logger.error(&format!("accept failed: {e}"));
                break;
            }
        }
    }
}

fn service_connection(
    token: Token,
    event: &mio::event::Event,
    poll: &mut Poll,
    connections: &mut HashMap<Token, Connection>,
    dispatcher: &mut SearchDispatcher,
    outbound: &OutboundQueue,
    logger: &Logger,
) {
    let mut should_close = false;

    if event.is_readable() {
        if let Some(conn) = connections.get_mut(&token) {
            loop {
                match conn.read_into_buf(READ_CHUNK) {
                    ReadResult::Data(n) => {
                        dispatch_request(&mut *dispatcher, conn.id, &mut conn.read_buf);
                        if n < READ_CHUNK {
                            break;
                        }
                    }
                    ReadResult::WouldBlock => break,
                    ReadResult::Eof => {
                        should_close = true;
                        break;
                    }
                    ReadResult::Err(e) => {
                        logger.error(&format!("read error on connection {}: {e}", conn.id));
                        should_close = true;
                        break;
                    }
                }
            }
        }
    }

    if !should_close && event.is_writable() {
        if let Some(conn) = connections.get_mut(&token) {
            flush_one(conn, outbound, logger);
        }
    }

    if should_close {
        if let Some(mut conn) = connections.remove(&token) {
            let _ = conn.deregister(poll.registry());
            outbound.drop_connection(conn.id);
        }
    }
}

/// Moves any newly queued responses into each connection's write buffer
/// and attempts a non-blocking flush, closing connections whose peer has
/// gone away.
fn flush_all(poll: &mut Poll, connections: &mut HashMap<Token, Connection>, outbound: &OutboundQueue) {
    let mut to_close = Vec::new();
    for (token, conn) in connections.iter_mut() {
        while let Some(chunk) = outbound.pop(conn.id) {
            conn.write_buf.extend_from_slice(&chunk);
        }
        if !conn.write_buf.is_empty() {
            match conn.flush_some() {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => to_close.push(*token),
            }
        }
        let want_write = !conn.write_buf.is_empty() || outbound.has_pending(conn.id);
        let _ = conn.reregister_for_write(poll.registry(), *token, want_write);
    }
    for token in to_close {
        if let Some(mut conn) = connections.remove(&token) {
            let _ = conn.deregister(poll.registry());
            outbound.drop_connection(conn.id);
        }
    }
}

fn flush_one(conn: &mut Connection, outbound: &OutboundQueue, logger: &Logger) {
    while let Some(chunk) = outbound.pop(conn.id) {
        conn.write_buf.extend_from_slice(&chunk);
    }
    if !conn.write_buf.is_empty() {
        if let Err(e) = conn.flush_some() {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                logger.error(&format!("write error on connection {}: {e}", conn.id));
            }
        }
    }
}
