//! Pure-timer dispatcher (spec.md §4.1 "scheduler variant") — no fds, just
//! deadlines. Grounded on the teacher's stubbed `src/plus/timer.rs` (a
//! `BinaryHeap`-shaped timer queue never filled in) and
//! `original_source/scheduler.h`'s single-thread-parks-on-soonest-deadline
//! design.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use slab::Slab;

use crate::dispatcher::{Callback, Dispatcher, Task};
use crate::resource::AsyncResource;

struct Entry {
    task_id: u64,
    callback: Option<Callback>,
}

struct Inner {
    regs: Slab<Entry>,
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
    stopped: bool,
}

/// A dispatcher that only ever services [`AsyncResource::Scheduled`]; any fd
/// resource is refused (`wait_async` returns `false`) so the provider tries
/// another dispatcher.
pub struct SchedulerDispatcher {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl SchedulerDispatcher {
    pub fn new() -> SchedulerDispatcher {
        SchedulerDispatcher {
            inner: Mutex::new(Inner {
                regs: Slab::new(),
                heap: BinaryHeap::new(),
                stopped: false,
            }),
            condvar: Condvar::new(),
        }
    }
}

impl Default for SchedulerDispatcher {
    fn default() -> SchedulerDispatcher {
        SchedulerDispatcher::new()
    }
}

impl Dispatcher for SchedulerDispatcher {
    fn wait_async(&self, resource: AsyncResource, callback: Callback, deadline: Instant) -> Option<Callback> {
        let task_id = match resource {
            AsyncResource::Scheduled(id, _) => id,
            _ => return Some(callback),
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            drop(inner);
            callback(false);
            return None;
        }
        let key = inner.regs.insert(Entry { task_id, callback: Some(callback) });
        inner.heap.push(Reverse((deadline, key)));
        drop(inner);
        self.condvar.notify_all();
        None
    }

    fn get_task(&self) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.stopped && inner.regs.is_empty() {
                return None;
            }
            match inner.heap.peek().copied() {
                None => {
                    inner = self.condvar.wait(inner).unwrap();
                }
                Some(Reverse((deadline, key))) => {
                    let now = Instant::now();
                    if deadline <= now {
                        inner.heap.pop();
                        if !inner.regs.contains(key) {
                            // Already detached via stop_wait; skip.
                            continue;
                        }
                        let entry = inner.regs.remove(key);
                        return Some(Task { callback: entry.callback.unwrap(), success: true });
                    }
                    let (guard, _timeout) =
                        self.condvar.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                }
            }
        }
    }

    fn interrupt(&self) {
        self.condvar.notify_all();
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        let regs = std::mem::take(&mut inner.regs);
        inner.heap.clear();
        drop(inner);
        for (_, entry) in regs {
            if let Some(cb) = entry.callback {
                cb(false);
            }
        }
        self.condvar.notify_all();
    }

    fn stop_wait(&self, resource: AsyncResource) -> Option<Callback> {
        let task_id = match resource {
            AsyncResource::Scheduled(id, _) => id,
            _ => return None,
        };
        let mut inner = self.inner.lock().unwrap();
        let key = inner
            .regs
            .iter()
            .find(|(_, e)| e.task_id == task_id)
            .map(|(k, _)| k)?;
        let entry = inner.regs.remove(key);
        entry.callback
    }
}
