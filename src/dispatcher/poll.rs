//! Level-triggered `poll(2)` dispatcher (spec.md §4.1 "poll-based dispatcher").
//!
//! Grounded on the teacher's `src/poll/mod.rs` (`poll`/`wait` free functions
//! over `libc::poll`) and `original_source/dispatcher.h`'s vector-of-pollfd
//! design; registrations live in a [`slab::Slab`] per Design Notes §9.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::time::Instant;

use slab::Slab;

use crate::dispatcher::{Callback, Dispatcher, Task};
use crate::resource::AsyncResource;
use crate::sys::poll as sys_poll;
use crate::waker::Waker;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

struct Reg {
    fd: RawFd,
    op: Op,
    callback: Option<Callback>,
    deadline: Instant,
}

struct Inner {
    regs: Slab<Reg>,
    by_fd: HashMap<RawFd, Vec<usize>>,
    stopped: bool,
}

/// A poll-based dispatcher. `get_task` must not be called concurrently from
/// more than one thread (the async provider enforces this by checking the
/// dispatcher out of its round-robin queue for the duration of the call).
pub struct PollDispatcher {
    inner: Mutex<Inner>,
    waker: Waker,
}

impl PollDispatcher {
    pub fn new() -> std::io::Result<PollDispatcher> {
        Ok(PollDispatcher {
            inner: Mutex::new(Inner {
                regs: Slab::new(),
                by_fd: HashMap::new(),
                stopped: false,
            }),
            waker: Waker::new()?,
        })
    }

    fn events_mask(op: Op) -> libc::c_short {
        match op {
            Op::Read => libc::POLLIN,
            Op::Write => libc::POLLOUT,
        }
    }
}

impl Dispatcher for PollDispatcher {
    fn wait_async(&self, resource: AsyncResource, callback: Callback, deadline: Instant) -> Option<Callback> {
        let (fd, op) = match resource {
            AsyncResource::Readable(fd) => (fd, Op::Read),
            AsyncResource::Writable(fd) => (fd, Op::Write),
            AsyncResource::Scheduled(..) => return Some(callback),
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            drop(inner);
            callback(false);
            return None;
        }
        let key = inner.regs.insert(Reg {
            fd,
            op,
            callback: Some(callback),
            deadline,
        });
        inner.by_fd.entry(fd).or_default().push(key);
        drop(inner);
        let _ = self.waker.wake();
        None
    }

    fn get_task(&self) -> Option<Task> {
        loop {
            let (mut pollfds, fd_order, timeout) = {
                let inner = self.inner.lock().unwrap();
                if inner.stopped && inner.regs.is_empty() {
                    return None;
                }
                let now = Instant::now();
                let mut next_deadline: Option<Instant> = None;
                let mut fd_order = Vec::with_capacity(inner.by_fd.len());
                let mut pollfds = Vec::with_capacity(inner.by_fd.len() + 1);
                pollfds.push(sys_poll::pollfd(self.waker.as_raw_fd(), libc::POLLIN));
                for (&fd, keys) in inner.by_fd.iter() {
                    let mut mask: libc::c_short = 0;
                    for &k in keys {
                        let reg = &inner.regs[k];
                        mask |= Self::events_mask(reg.op);
                        next_deadline = Some(next_deadline.map_or(reg.deadline, |d| d.min(reg.deadline)));
                    }
                    fd_order.push(fd);
                    pollfds.push(sys_poll::pollfd(fd, mask));
                }
                let timeout = next_deadline.map(|d| d.saturating_duration_since(now));
                (pollfds, fd_order, timeout)
            };

            sys_poll::poll(&mut pollfds, timeout).expect("poll(2) failed");

            let mut inner = self.inner.lock().unwrap();

            if pollfds[0].revents != 0 {
                let _ = self.waker.drain();
            }

            for (i, &fd) in fd_order.iter().enumerate() {
                let revents = pollfds[i + 1].revents;
                if revents == 0 {
                    continue;
                }
                let keys = inner.by_fd.get(&fd).cloned().unwrap_or_default();
                for k in keys {
                    let matches = {
                        let reg = &inner.regs[k];
                        let ready = match reg.op {
                            Op::Read => revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
                            Op::Write => revents & (libc::POLLOUT | libc::POLLERR) != 0,
                        };
                        ready
                    };
                    if matches {
                        let reg = inner.regs.remove(k);
                        remove_from_by_fd(&mut inner.by_fd, fd, k);
                        let callback = reg.callback.unwrap();
                        drop(inner);
                        return Some(Task { callback, success: true });
                    }
                }
            }

            // No readiness matched: look for expired deadlines.
            let now = Instant::now();
            let mut expired: Option<usize> = None;
            for (k, reg) in inner.regs.iter() {
                if reg.deadline <= now {
                    if expired.map_or(true, |e| reg.deadline < inner.regs[e].deadline) {
                        expired = Some(k);
                    }
                }
            }
            if let Some(k) = expired {
                let fd = inner.regs[k].fd;
                let reg = inner.regs.remove(k);
                remove_from_by_fd(&mut inner.by_fd, fd, k);
                let callback = reg.callback.unwrap();
                drop(inner);
                return Some(Task { callback, success: false });
            }

            if inner.stopped {
                // stop() drained everything already; nothing left to do.
                return None;
            }
            // Spurious wake (interrupt or fresh registration): loop and rebuild.
        }
    }

    fn interrupt(&self) {
        let _ = self.waker.wake();
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        let regs = std::mem::take(&mut inner.regs);
        inner.by_fd.clear();
        drop(inner);
        for (_, reg) in regs {
            if let Some(cb) = reg.callback {
                cb(false);
            }
        }
        let _ = self.waker.wake();
    }

    fn stop_wait(&self, resource: AsyncResource) -> Option<Callback> {
        let (fd, op) = match resource {
            AsyncResource::Readable(fd) => (fd, Op::Read),
            AsyncResource::Writable(fd) => (fd, Op::Write),
            AsyncResource::Scheduled(..) => return None,
        };
        let mut inner = self.inner.lock().unwrap();
        let keys = inner.by_fd.get(&fd).cloned().unwrap_or_default();
        for k in keys {
            if inner.regs[k].op == op {
                let reg = inner.regs.remove(k);
                remove_from_by_fd(&mut inner.by_fd, fd, k);
                return reg.callback;
            }
        }
        None
    }
}

fn remove_from_by_fd(map: &mut HashMap<RawFd, Vec<usize>>, fd: RawFd, key: usize) {
    if let std::collections::hash_map::Entry::Occupied(mut e) = map.entry(fd) {
        e.get_mut().retain(|&k| k != key);
        if e.get().is_empty() {
            e.remove();
        }
    }
}
