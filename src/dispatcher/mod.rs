//! C4 — Dispatcher (spec.md §4.1).

pub mod epoll;
pub mod poll;
pub mod scheduler;

use std::time::Instant;

use crate::resource::AsyncResource;

/// `success = true` means the wait was satisfied (readiness or scheduled
/// time reached); `false` means timeout or cancellation.
pub type Callback = Box<dyn FnOnce(bool) + Send>;

/// Produced by a dispatcher, consumed by a provider worker thread.
pub struct Task {
    pub callback: Callback,
    pub success: bool,
}

impl Task {
    pub fn run(self) {
        (self.callback)(self.success);
    }
}

/// One polling instance serving a set of async resources (spec.md §4.1).
///
/// Implementors: [`poll::PollDispatcher`] (level-triggered `poll(2)`),
/// [`epoll::EpollDispatcher`] (one-shot edge-triggered `epoll(7)`),
/// [`scheduler::SchedulerDispatcher`] (timers only, no fd).
pub trait Dispatcher: Send + Sync {
    /// Register `resource` with `callback`, firing by `deadline` at the
    /// latest. Returns `None` once the callback has been consumed (either
    /// queued or invoked synchronously because the dispatcher is stopped).
    /// Returns `Some(callback)` — handing the callback back — if this
    /// dispatcher cannot service the resource kind, so the caller can try
    /// another dispatcher or fail with *no-dispatcher-for-resource*.
    fn wait_async(&self, resource: AsyncResource, callback: Callback, deadline: Instant) -> Option<Callback>;

    /// Block until a registration is ready or times out, returning the task
    /// to run. Never returns `None` except after `stop()` has drained
    /// everything.
    fn get_task(&self) -> Option<Task>;

    /// Wake a blocked `get_task` without producing a task of its own.
    fn interrupt(&self);

    /// Cancel every pending registration with `success = false`, then wake
    /// any blocked `get_task`. Idempotent.
    fn stop(&self);

    /// Cancel the registration matching `resource` and return its callback
    /// so the caller can invoke it with whichever outcome it prefers.
    fn stop_wait(&self, resource: AsyncResource) -> Option<Callback>;
}
