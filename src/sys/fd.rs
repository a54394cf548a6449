use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

/// Owns exactly one OS descriptor; closes it on drop.
///
/// Deliberately not `Clone` — duplicate a descriptor with [`FileDesc::try_clone`]
/// (via `dup`) when two handles genuinely need to share the kernel object.
#[derive(Debug)]
pub struct FileDesc(RawFd);

impl FileDesc {
    /// # Safety
    /// `fd` must be a valid, open descriptor not owned elsewhere.
    pub unsafe fn new(fd: RawFd) -> Self {
        FileDesc(fd)
    }

    pub fn try_clone(&self) -> io::Result<FileDesc> {
        let fd = syscall!(fcntl(self.0, libc::F_DUPFD_CLOEXEC, 0))?;
        Ok(FileDesc(fd))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let flags = syscall!(fcntl(self.0, libc::F_GETFL))?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        syscall!(fcntl(self.0, libc::F_SETFL, flags))?;
        Ok(())
    }
}

impl Read for FileDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Read for &FileDesc {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = syscall!(read(
            self.0,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len()
        ))?;
        Ok(n as usize)
    }
}

impl Write for FileDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &FileDesc {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = syscall!(write(
            self.0,
            buf.as_ptr() as *const libc::c_void,
            buf.len()
        ))?;
        Ok(n as usize)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FromRawFd for FileDesc {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        FileDesc(fd)
    }
}

impl AsRawFd for FileDesc {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl IntoRawFd for FileDesc {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl Drop for FileDesc {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.0);
        }
    }
}
