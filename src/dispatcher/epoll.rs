//! One-shot edge-triggered `epoll(7)` dispatcher (spec.md §4.1 "epoll variant").
//!
//! Grounded on the teacher's `src/epoll/mod.rs` + `src/sys/epoll.rs` and
//! `original_source/dispatcher_epoll.h`'s algorithm: per-fd registration
//! lists, one-shot rearm with the union of remaining interests, and a
//! deadline index used both to size `epoll_wait`'s timeout and to resolve
//! ties on timeout.

use std::collections::{BTreeSet, HashMap};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::dispatcher::{Callback, Dispatcher, Task};
use crate::ready::Ready;
use crate::resource::AsyncResource;
use crate::sys::epoll::{Epoll, Events};
use crate::token::Token;
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
    deadlines: BTreeSet<(Instant, usize)>,
    stopped: bool,
}

pub struct EpollDispatcher {
    epoll: Epoll,
    waker: Waker,
    inner: Mutex<Inner>,
}

impl EpollDispatcher {
    pub fn new() -> std::io::Result<EpollDispatcher> {
        let epoll = Epoll::new()?;
        let waker = Waker::new()?;
        epoll.set(waker.as_raw_fd(), Token(usize::MAX), Ready::readable(), false)?;
        Ok(EpollDispatcher {
            epoll,
            waker,
            inner: Mutex::new(Inner {
                regs: Slab::new(),
                by_fd: HashMap::new(),
                deadlines: BTreeSet::new(),
                stopped: false,
            }),
        })
    }

    /// Recompute the union of interests for `fd`'s remaining registrations
    /// and rearm (or delete) its epoll interest accordingly.
    fn rearm_fd(&self, inner: &Inner, fd: RawFd) {
        match inner.by_fd.get(&fd) {
            Some(keys) if !keys.is_empty() => {
                let mut interest = Ready::empty();
                for &k in keys {
                    interest |= match inner.regs[k].op {
                        Op::Read => Ready::readable(),
                        Op::Write => Ready::writable(),
                    };
                }
                let _ = self.epoll.set(fd, Token(fd as usize), interest, true);
            }
            _ => {
                let _ = self.epoll.delete(fd);
            }
        }
    }

    fn detach(&self, inner: &mut Inner, key: usize) -> Reg {
        let reg = inner.regs.remove(key);
        inner.deadlines.remove(&(reg.deadline, key));
        if let Some(keys) = inner.by_fd.get_mut(&reg.fd) {
            keys.retain(|&k| k != key);
            if keys.is_empty() {
                inner.by_fd.remove(&reg.fd);
            }
        }
        reg
    }
}

impl Dispatcher for EpollDispatcher {
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
        let key = inner.regs.insert(Reg { fd, op, callback: Some(callback), deadline });
        inner.by_fd.entry(fd).or_default().push(key);
        inner.deadlines.insert((deadline, key));
        self.rearm_fd(&inner, fd);
        drop(inner);
        let _ = self.waker.wake();
        None
    }

    fn get_task(&self) -> Option<Task> {
        loop {
            let wait_ms = {
                let inner = self.inner.lock().unwrap();
                if inner.stopped && inner.regs.is_empty() {
                    return None;
                }
                inner.deadlines.iter().next().map(|(deadline, _)| {
                    deadline.saturating_duration_since(Instant::now())
                })
            };

            let mut events = Events::with_capacity(16);
            self.epoll.wait(&mut events, wait_ms).expect("epoll_wait failed");

            let mut inner = self.inner.lock().unwrap();

            let mut ready_fd = None;
            for (token, readiness) in events.iter() {
                if token == Token(usize::MAX) {
                    let _ = self.waker.drain();
                    continue;
                }
                ready_fd = Some((token.0 as RawFd, readiness));
                break;
            }

            if let Some((fd, readiness)) = ready_fd {
                if let Some(keys) = inner.by_fd.get(&fd).cloned() {
                    let hit = keys.into_iter().find(|&k| {
                        let reg = &inner.regs[k];
                        match reg.op {
                            Op::Read => readiness.is_readable() || readiness.is_hup() || readiness.is_error(),
                            Op::Write => readiness.is_writable() || readiness.is_error(),
                        }
                    });
                    if let Some(key) = hit {
                        let reg = self.detach(&mut inner, key);
                        self.rearm_fd(&inner, fd);
                        drop(inner);
                        return Some(Task { callback: reg.callback.unwrap(), success: true });
                    }
                }
                // Readiness fired but no registration matched; rearm and retry.
                self.rearm_fd(&inner, fd);
            }

            // No matching readiness: check for an expired deadline.
            let now = Instant::now();
            let expired = inner.deadlines.iter().next().copied().filter(|(d, _)| *d <= now);
            if let Some((_, key)) = expired {
                let fd = inner.regs[key].fd;
                let reg = self.detach(&mut inner, key);
                self.rearm_fd(&inner, fd);
                drop(inner);
                return Some(Task { callback: reg.callback.unwrap(), success: false });
            }

            if inner.stopped {
                return None;
            }
            // Spurious wake (interrupt / fresh registration racing epoll_wait): retry.
        }
    }

    fn interrupt(&self) {
        let _ = self.waker.wake();
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        let regs = std::mem::take(&mut inner.regs);
        let fds: Vec<RawFd> = inner.by_fd.keys().copied().collect();
        inner.by_fd.clear();
        inner.deadlines.clear();
        for fd in fds {
            let _ = self.epoll.delete(fd);
        }
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
        let hit = keys.into_iter().find(|&k| inner.regs[k].op == op);
        if let Some(key) = hit {
            let reg = self.detach(&mut inner, key);
            self.rearm_fd(&inner, fd);
            return reg.callback;
        }
        None
    }
}

/// Sentinel "never" deadline, per spec.md §5 ("Deadlines are absolute time
/// points; `max()` means never"). `Instant` has no portable max that survives
/// arithmetic, so this uses a century out instead.
pub fn never() -> Instant {
    Instant::now() + Duration::from_secs(100 * 365 * 24 * 3600)
}
