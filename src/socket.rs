//! C2 — Socket Primitive (spec.md §3 "Socket handle", §4).

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{self as unet, UnixListener, UnixStream};
use std::path::Path;

use crate::addr::Endpoint;

/// Anything read/write/fd-bearing enough to sit behind a [`SocketHandle`].
pub trait RawIo: Read + Write + AsRawFd + Send {
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

impl RawIo for TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }
}

impl RawIo for UnixStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        UnixStream::shutdown(self, how)
    }
}

/// Non-blocking socket handle. Owns one OS descriptor (the destructor closes
/// it via the wrapped socket type's own `Drop`); per-direction timeouts in
/// milliseconds (`-1` = infinite) and a single sticky "timed-out" flag that
/// the caller clears explicitly. Move-only: no `Clone` impl.
pub struct SocketHandle {
    inner: Box<dyn RawIo>,
    read_timeout_ms: Cell<i64>,
    write_timeout_ms: Cell<i64>,
    timed_out: Cell<bool>,
}

// `Stream` only ever touches a socket's fd via raw syscalls and the
// `Cell` timeout/timed-out bookkeeping under its own single-reader/
// single-writer discipline (debug-asserted, spec.md §4.3); the box
// itself is never mutated after construction except by `Drop`.
unsafe impl Sync for SocketHandle {}

impl SocketHandle {
    fn new(inner: Box<dyn RawIo>) -> SocketHandle {
        SocketHandle {
            inner,
            read_timeout_ms: Cell::new(-1),
            write_timeout_ms: Cell::new(-1),
            timed_out: Cell::new(false),
        }
    }

    pub fn connect(endpoint: &Endpoint) -> io::Result<SocketHandle> {
        let inner: Box<dyn RawIo> = match endpoint {
            Endpoint::V4(a) => Box::new(TcpStream::connect(SocketAddr::V4(*a))?),
            Endpoint::V6(a) => Box::new(TcpStream::connect(SocketAddr::V6(*a))?),
            Endpoint::Unix(p, _) => Box::new(UnixStream::connect(p)?),
        };
        let sock = SocketHandle::new(inner);
        sock.set_nonblocking(true)?;
        Ok(sock)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        set_fd_nonblocking(self.inner.as_raw_fd(), nonblocking)
    }

    pub fn set_read_timeout_ms(&self, ms: i64) {
        self.read_timeout_ms.set(ms);
    }

    pub fn set_write_timeout_ms(&self, ms: i64) {
        self.write_timeout_ms.set(ms);
    }

    pub fn read_timeout_ms(&self) -> i64 {
        self.read_timeout_ms.get()
    }

    pub fn write_timeout_ms(&self) -> i64 {
        self.write_timeout_ms.get()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.get()
    }

    pub fn set_timed_out(&self, v: bool) {
        self.timed_out.set(v);
    }

    pub fn close_input(&self) -> io::Result<()> {
        self.inner.shutdown(Shutdown::Read)
    }

    pub fn close_output(&self) -> io::Result<()> {
        self.inner.shutdown(Shutdown::Write)
    }
}

impl Read for SocketHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SocketHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for SocketHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

fn set_fd_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = crate::sys::syscall!(fcntl(fd, libc::F_GETFL))?;
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    crate::sys::syscall!(fcntl(fd, libc::F_SETFL, flags))?;
    Ok(())
}

/// A bound listener over one resolved [`Endpoint`]; `accept` yields a
/// non-blocking [`SocketHandle`] plus the peer's endpoint.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    pub fn bind(endpoint: &Endpoint) -> io::Result<Listener> {
        match endpoint {
            Endpoint::V4(a) => {
                let l = TcpListener::bind(SocketAddr::V4(*a))?;
                l.set_nonblocking(true)?;
                Ok(Listener::Tcp(l))
            }
            Endpoint::V6(a) => {
                let l = TcpListener::bind(SocketAddr::V6(*a))?;
                l.set_nonblocking(true)?;
                Ok(Listener::Tcp(l))
            }
            Endpoint::Unix(path, perm) => {
                let _ = std::fs::remove_file(path);
                let l = UnixListener::bind(path)?;
                l.set_nonblocking(true)?;
                if let Some(perm) = perm {
                    set_unix_perm(path, *perm)?;
                }
                Ok(Listener::Unix(l))
            }
        }
    }

    /// The bound local address, mainly useful when binding to port `0` and
    /// letting the OS pick one (tests, ephemeral services).
    pub fn local_addr(&self) -> io::Result<PeerAddr> {
        match self {
            Listener::Tcp(l) => Ok(PeerAddr::Tcp(l.local_addr()?)),
            Listener::Unix(l) => Ok(PeerAddr::Unix(l.local_addr()?.as_pathname().map(|p| p.to_path_buf()))),
        }
    }

    pub fn accept(&self) -> io::Result<(SocketHandle, PeerAddr)> {
        match self {
            Listener::Tcp(l) => {
                let (s, addr) = l.accept()?;
                s.set_nonblocking(true)?;
                Ok((SocketHandle::new(Box::new(s)), PeerAddr::Tcp(addr)))
            }
            Listener::Unix(l) => {
                let (s, addr) = l.accept()?;
                s.set_nonblocking(true)?;
                let path = addr.as_pathname().map(|p| p.to_path_buf());
                Ok((SocketHandle::new(Box::new(s)), PeerAddr::Unix(path)))
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix(l) => l.as_raw_fd(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PeerAddr {
    Tcp(net::SocketAddr),
    Unix(Option<std::path::PathBuf>),
}

fn set_unix_perm(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perm = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perm)
}

/// Re-exported so `crate::socket::pair()` mirrors `unet::UnixStream::pair`,
/// used for the action-queue/self-pipe idiom and in tests.
pub fn pair() -> io::Result<(SocketHandle, SocketHandle)> {
    let (a, b) = unet::UnixStream::pair()?;
    a.set_nonblocking(true)?;
    b.set_nonblocking(true)?;
    Ok((
        SocketHandle::new(Box::new(a)),
        SocketHandle::new(Box::new(b)),
    ))
}

