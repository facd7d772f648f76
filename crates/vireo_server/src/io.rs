//! Non-blocking-safe read/write helpers over byte streams, retrying on
//! interruption. `mio`'s readiness model requires non-blocking descriptors,
//! so unlike the original (blocking sockets gated by `select`), a readable
//! descriptor can still report `WouldBlock` on a given call; callers treat
//! that the same as "nothing to do this cycle" rather than as EOF or error.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::RawFd;

/// Appends up to `cap` bytes read from `fd` onto `buf`.
///
/// `Ok(0)` means EOF. A `WouldBlock` error means no data is available right
/// now (not EOF, not a real failure); any other error is unrecoverable for
/// this descriptor.
pub fn read_append_fd(buf: &mut Vec<u8>, fd: RawFd, cap: usize) -> io::Result<usize> {
    let start = buf.len();
    buf.resize(start + cap, 0);
    loop {
        let ret = unsafe { libc::read(fd, buf[start..].as_mut_ptr() as *mut _, cap) };
        if ret >= 0 {
            buf.truncate(start + ret as usize);
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        buf.truncate(start);
        return Err(err);
    }
}

/// Writes a best-effort prefix of `buf`; the caller erases that prefix.
pub fn write_some_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        let ret = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Blocks until exactly `n` bytes are obtained or EOF; a result shorter
/// than `n` means EOF was reached first. Used only for the rare case of
/// reading a fixed-size preamble from a freshly-accepted blocking stream.
pub fn read_exact_fd(fd: RawFd, n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let mut chunk = [0u8; 4096];
        let want = (n - out.len()).min(chunk.len());
        let ret = unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut _, want) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if ret == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..ret as usize]);
    }
    out
}

pub fn write_all_fd(fd: RawFd, bytes: &[u8]) -> bool {
    let mut offset = 0;
    while offset < bytes.len() {
        match write_some_fd(fd, &bytes[offset..]) {
            Ok(n) if n > 0 => offset += n,
            _ => return false,
        }
    }
    true
}

pub fn close_fd(fd: RawFd) -> bool {
    loop {
        let ret = unsafe { libc::close(fd) };
        if ret == 0 {
            return true;
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return false;
        }
    }
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Same contract as `read_append_fd`, over anything implementing `Read`
/// (used for `mio::net::TcpStream`, which is already non-blocking).
pub fn read_append_stream<R: Read>(buf: &mut Vec<u8>, stream: &mut R, cap: usize) -> io::Result<usize> {
    let start = buf.len();
    buf.resize(start + cap, 0);
    loop {
        match stream.read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                return Ok(n);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        }
    }
}

pub fn write_some_stream<W: Write>(stream: &mut W, buf: &[u8]) -> io::Result<usize> {
    loop {
        match stream.write(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_append_fd_reads_from_a_pipe() {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);
        assert!(write_all_fd(write_fd, b"hello"));
        close_fd(write_fd);

        let mut buf = Vec::new();
        let n = read_append_fd(&mut buf, read_fd, 65536).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf, b"hello");

        let n = read_append_fd(&mut buf, read_fd, 65536).unwrap();
        assert_eq!(n, 0); // EOF
        close_fd(read_fd);
    }

    #[test]
    fn read_exact_fd_blocks_until_the_full_count_then_stops() {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        // Arrives in two writes; read_exact_fd must keep reading across both.
        let writer = std::thread::spawn(move || {
            assert!(write_all_fd(write_fd, b"hel"));
            std::thread::sleep(std::time::Duration::from_millis(10));
            assert!(write_all_fd(write_fd, b"lo"));
            close_fd(write_fd);
        });

        let out = read_exact_fd(read_fd, 5);
        assert_eq!(out, b"hello");
        writer.join().unwrap();
        close_fd(read_fd);
    }

    #[test]
    fn read_exact_fd_returns_short_on_eof() {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);
        assert!(write_all_fd(write_fd, b"ab"));
        close_fd(write_fd);

        let out = read_exact_fd(read_fd, 5);
        assert_eq!(out, b"ab");
        close_fd(read_fd);
    }
}
