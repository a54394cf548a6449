//! A5 — TLS glue (feature `tls`): a blocking wrapper around `rustls`
//! sitting in front of a [`SocketHandle`].
//!
//! Unlike [`Stream`](crate::stream::Stream), which talks to the fd through
//! raw `read(2)`/`write(2)` syscalls, TLS record framing must go through
//! `rustls`'s own `Read`/`Write`-based state machine, so this is a
//! self-contained blocking stream rather than another `TimedIo` impl —
//! `rustls::StreamOwned` already handles the retry-on-`WouldBlock` loop
//! against the non-blocking socket via `poll_ready`.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection, StreamOwned};

use crate::socket::SocketHandle;

fn poll_ready(fd: RawFd, writable: bool, timeout_ms: i64) -> io::Result<bool> {
    let mut pfd = crate::sys::poll::pollfd(fd, if writable { libc::POLLOUT } else { libc::POLLIN });
    let timeout = if timeout_ms < 0 { None } else { Some(Duration::from_millis(timeout_ms as u64)) };
    Ok(crate::sys::poll::poll(std::slice::from_mut(&mut pfd), timeout)? > 0)
}

/// Retries `f` against the socket's own read/write timeout whenever it
/// reports `WouldBlock`, the way the teacher's `Stream` retries raw reads.
/// Takes the fd and timeout by value so the retry loop never needs to
/// borrow the socket while `f` also holds it mutably through `StreamOwned`.
fn retrying<T>(fd: RawFd, writable: bool, timeout_ms: i64, mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !poll_ready(fd, writable, timeout_ms)? {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "tls i/o timed out"));
                }
            }
            other => return other,
        }
    }
}

/// A completed TLS connection, server or client side.
pub enum TlsStream {
    Server(StreamOwned<ServerConnection, SocketHandle>),
    Client(StreamOwned<ClientConnection, SocketHandle>),
}

impl TlsStream {
    /// Completes a server-side handshake over `sock` using `config`.
    pub fn accept(config: Arc<ServerConfig>, sock: SocketHandle) -> io::Result<TlsStream> {
        let conn = ServerConnection::new(config).map_err(to_io_error)?;
        let mut stream = StreamOwned::new(conn, sock);
        drive_handshake(&mut stream)?;
        Ok(TlsStream::Server(stream))
    }

    /// Completes a client-side handshake over `sock` using `config`,
    /// verifying the peer against `server_name`.
    pub fn connect(
        config: Arc<ClientConfig>,
        server_name: rustls::pki_types::ServerName<'static>,
        sock: SocketHandle,
    ) -> io::Result<TlsStream> {
        let conn = ClientConnection::new(config, server_name).map_err(to_io_error)?;
        let mut stream = StreamOwned::new(conn, sock);
        drive_handshake(&mut stream)?;
        Ok(TlsStream::Client(stream))
    }

    fn sock(&self) -> &SocketHandle {
        match self {
            TlsStream::Server(s) => &s.sock,
            TlsStream::Client(s) => &s.sock,
        }
    }

    fn fd(&self) -> RawFd {
        std::os::unix::io::AsRawFd::as_raw_fd(self.sock())
    }

    /// Reads one chunk of decrypted application data, blocking (honoring
    /// the inner socket's read timeout) until data arrives or EOF.
    pub fn read_sync(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd();
        let timeout_ms = self.sock().read_timeout_ms();
        let result = retrying(fd, false, timeout_ms, || match self {
            TlsStream::Server(s) => s.read(buf),
            TlsStream::Client(s) => s.read(buf),
        });
        if matches!(result, Err(ref e) if e.kind() == io::ErrorKind::TimedOut) {
            self.sock().set_timed_out(true);
        }
        result
    }

    pub fn write_sync(&mut self, data: &[u8]) -> io::Result<()> {
        let fd = self.fd();
        let timeout_ms = self.sock().write_timeout_ms();
        let mut offset = 0;
        while offset < data.len() {
            let n = retrying(fd, true, timeout_ms, || match self {
                TlsStream::Server(s) => s.write(&data[offset..]),
                TlsStream::Client(s) => s.write(&data[offset..]),
            })?;
            offset += n;
        }
        Ok(())
    }

    pub fn close(&mut self) -> io::Result<()> {
        match self {
            TlsStream::Server(s) => {
                s.conn.send_close_notify();
                s.flush()
            }
            TlsStream::Client(s) => {
                s.conn.send_close_notify();
                s.flush()
            }
        }
    }
}

fn drive_handshake<C, S>(stream: &mut StreamOwned<C, S>) -> io::Result<()>
where
    StreamOwned<C, S>: Read + Write,
{
    stream.flush()
}

fn to_io_error(e: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
