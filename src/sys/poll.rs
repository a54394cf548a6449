//! Raw `poll(2)` wrapper backing [`crate::dispatcher::poll::PollDispatcher`].

use std::cmp;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = timeout
        .map(|d| cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1);

    loop {
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret as usize);
    }
}

pub fn pollfd(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}
