//! A connection: a bidirectional byte stream identified by a non-negative
//! integer, owned exclusively by the event loop.

use std::io;
use std::os::unix::io::RawFd;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

use crate::io as rawio;

/// The underlying transport for a connection: the stdio pair (id 0) or a
/// TCP peer (id == the socket's read fd).
pub enum Endpoint {
    Stdio { read_fd: RawFd, write_fd: RawFd },
    Tcp(TcpStream),
}

pub struct Connection {
    pub id: i64,
    pub endpoint: Endpoint,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
}

/// Outcome of one read attempt, distinguishing "nothing available right
/// now" from real EOF and from a real error (see `io` module docs).
pub enum ReadResult {
    Data(usize),
    WouldBlock,
    Eof,
    Err(io::Error),
}

impl Connection {
    pub fn stdio() -> Self {
        let _ = rawio::set_nonblocking(0);
        let _ = rawio::set_nonblocking(1);
        Self {
            id: 0,
            endpoint: Endpoint::Stdio { read_fd: 0, write_fd: 1 },
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        }
    }

    pub fn tcp(id: i64, stream: TcpStream) -> Self {
        Self {
            id,
            endpoint: Endpoint::Tcp(stream),
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        }
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match &mut self.endpoint {
            Endpoint::Stdio { read_fd, .. } => {
                registry.register(&mut SourceFd(read_fd), token, Interest::READABLE)
            }
            Endpoint::Tcp(stream) => registry.register(stream, token, Interest::READABLE | Interest::WRITABLE),
        }
    }

    pub fn reregister_for_write(&mut self, registry: &Registry, token: Token, want_write: bool) -> io::Result<()> {
        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        match &mut self.endpoint {
            Endpoint::Stdio { .. } => Ok(()),
            Endpoint::Tcp(stream) => registry.reregister(stream, token, interest),
        }
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match &mut self.endpoint {
            Endpoint::Stdio { read_fd, .. } => registry.deregister(&mut SourceFd(read_fd)),
            Endpoint::Tcp(stream) => registry.deregister(stream),
        }
    }

    pub fn read_into_buf(&mut self, cap: usize) -> ReadResult {
        let result = match &mut self.endpoint {
            Endpoint::Stdio { read_fd, .. } => rawio::read_append_fd(&mut self.read_buf, *read_fd, cap),
            Endpoint::Tcp(stream) => rawio::read_append_stream(&mut self.read_buf, stream, cap),
        };
        match result {
            Ok(0) => ReadResult::Eof,
            Ok(n) => ReadResult::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadResult::WouldBlock,
            Err(e) => ReadResult::Err(e),
        }
    }

    /// Writes as much of `write_buf` as the descriptor will currently
    /// accept; on success the written prefix has already been erased.
    pub fn flush_some(&mut self) -> Result<usize, io::Error> {
        let result = match &mut self.endpoint {
            Endpoint::Stdio { write_fd, .. } => rawio::write_some_fd(*write_fd, &self.write_buf),
            Endpoint::Tcp(stream) => rawio::write_some_stream(stream, &self.write_buf),
        };
        if let Ok(n) = result {
            self.write_buf.drain(0..n);
        }
        result
    }
}
