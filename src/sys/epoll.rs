//! Raw `epoll(7)` wrapper backing [`crate::dispatcher::epoll::EpollDispatcher`].
//!
//! Grounded on the teacher's `src/sys/epoll.rs`: one-shot edge interest,
//! `u64` cookie carrying a [`crate::token::Token`].

use std::cmp;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

use crate::ready::Ready;
use crate::token::Token;

pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll { epfd })
    }

    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|d| cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        loop {
            let cnt = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    events.inner.as_mut_ptr(),
                    events.inner.capacity() as i32,
                    timeout_ms,
                )
            };
            if cnt < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            unsafe { events.inner.set_len(cnt as usize) };
            return Ok(cnt as usize);
        }
    }

    /// Arm (or rearm, one-shot) interest for `fd`, tagging events with `token`.
    pub fn set(&self, fd: RawFd, token: Token, interest: Ready, oneshot: bool) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: to_epoll_mask(interest, oneshot),
            u64: usize::from(token) as u64,
        };
        match syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info)) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info)).map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        match syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info)) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn to_epoll_mask(interest: Ready, oneshot: bool) -> u32 {
    let mut mask = 0i32;
    if interest.is_readable() {
        mask |= EPOLLIN;
    }
    if interest.is_writable() {
        mask |= EPOLLOUT;
    }
    mask |= EPOLLRDHUP;
    if oneshot {
        mask |= EPOLLONESHOT;
    } else {
        mask |= EPOLLET;
    }
    mask as u32
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

pub struct Events {
    inner: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(cap: usize) -> Events {
        Events {
            inner: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, Ready)> + '_ {
        self.inner.iter().map(|ev| {
            let mut ready = Ready::empty();
            let bits = ev.events as i32;
            if bits & (EPOLLIN | libc::EPOLLPRI) != 0 {
                ready |= Ready::readable();
            }
            if bits & EPOLLOUT != 0 {
                ready |= Ready::writable();
            }
            if bits & EPOLLERR != 0 {
                ready |= Ready::error();
            }
            if bits & (EPOLLHUP | EPOLLRDHUP) != 0 {
                ready |= Ready::hup();
            }
            (Token(ev.u64 as usize), ready)
        })
    }
}
