use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use super::fd::FileDesc;

/// `eventfd(2)` counter used as the self-wake resource for every dispatcher
/// and as the backing primitive for [`crate::waker::Waker`].
#[derive(Debug)]
pub struct EventFd(FileDesc);

impl EventFd {
    pub fn new() -> io::Result<EventFd> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        Ok(EventFd(unsafe { FileDesc::new(fd) }))
    }

    pub fn bump(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        match (&self.0).write(&buf) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn drain(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        match (&self.0).read(&mut buf) {
            Ok(_) => Ok(u64::from_ne_bytes(buf)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl FromRawFd for EventFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        EventFd(FileDesc::from_raw_fd(fd))
    }
}

#[cfg(test)]
mod test {
    use super::EventFd;

    #[test]
    fn bump_and_drain() {
        let ev = EventFd::new().unwrap();
        ev.bump().unwrap();
        assert_eq!(ev.drain().unwrap(), 1);
        assert_eq!(ev.drain().unwrap(), 0);
    }
}
