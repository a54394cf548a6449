use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::sys::eventfd::EventFd;

/// Cheap, cloneable handle used to interrupt a blocked `poll`/`epoll_wait`
/// from another thread. Grounded on the teacher's `src/waker.rs`.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<EventFd>,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        Ok(Waker {
            inner: Arc::new(EventFd::new()?),
        })
    }

    pub fn wake(&self) -> io::Result<()> {
        self.inner.bump()
    }

    pub fn drain(&self) -> io::Result<()> {
        self.inner.drain().map(|_| ())
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
