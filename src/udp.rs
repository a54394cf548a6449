//! A8 — UDP datagram wrapper, grounded on
//! `original_source/dgramsocket.cpp`'s `DGramSocket`: a non-blocking
//! datagram socket with a reusable receive buffer, registered on a
//! dispatcher for async reads.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::provider::AsyncProvider;
use crate::resource::AsyncResource;

const DEFAULT_BUF: usize = 4096;

/// A bound or connected UDP socket plus its receive buffer. Grounded on the
/// source's `inputBuffer`/`rcvsize` pair: one allocation reused across
/// `recv` calls, resized up only if a datagram arrives truncated.
pub struct DGramSocket {
    sock: UdpSocket,
    provider: AsyncProvider,
    buf: Vec<u8>,
}

impl DGramSocket {
    pub fn bind(addr: SocketAddr, provider: AsyncProvider) -> io::Result<DGramSocket> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        Ok(DGramSocket { sock, provider, buf: vec![0u8; DEFAULT_BUF] })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    /// Blocking receive with an optional timeout (`None` = wait forever).
    /// Returns the payload and sender address, or `None` on timeout.
    pub fn recv(&mut self, timeout: Option<Duration>) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        loop {
            match self.sock.recv_from(&mut self.buf) {
                Ok((n, from)) => {
                    if n == self.buf.len() {
                        self.buf.resize(self.buf.len() * 2, 0);
                        continue;
                    }
                    return Ok(Some((self.buf[..n].to_vec(), from)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let mut pfd = crate::sys::poll::pollfd(self.sock.as_raw_fd(), libc::POLLIN);
                    if crate::sys::poll::poll(std::slice::from_mut(&mut pfd), timeout)? == 0 {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<()> {
        let n = self.sock.send_to(data, target)?;
        if n != data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "datagram truncated on send"));
        }
        Ok(())
    }

    /// Registers one asynchronous receive with the provider; `callback`
    /// fires with `None` on timeout/cancellation, `Some((data, from))`
    /// once a datagram is ready. Unlike `Stream::read_async`, this performs
    /// the actual `recvfrom` eagerly once woken, matching the source's
    /// `readAsync`'s "drive one recv, then re-register if empty" loop.
    pub fn recv_async(
        self: &Arc<std::sync::Mutex<DGramSocket>>,
        deadline: Instant,
        callback: impl FnOnce(io::Result<Option<(Vec<u8>, SocketAddr)>>) + Send + 'static,
    ) {
        let fd = self.lock().unwrap().as_raw_fd();
        let provider = self.lock().unwrap().provider.clone();
        let this = self.clone();
        let result = provider.wait_async(
            AsyncResource::Readable(fd),
            deadline,
            Box::new(move |success| {
                if !success {
                    callback(Ok(None));
                    return;
                }
                let mut guard = this.lock().unwrap();
                callback(guard.recv(Some(Duration::from_secs(0))));
            }),
        );
        if result.is_err() {
            callback(Err(io::Error::new(io::ErrorKind::Other, "no dispatcher available")));
        }
    }
}
