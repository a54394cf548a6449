use std::os::unix::io::RawFd;
use std::time::Instant;

/// Pure description of "what to wait for" (spec.md §3 "Async Resource").
///
/// Holds no ownership of the fd — it is moved into a dispatcher's
/// registration table and matched against by `match`, per Design Notes §9
/// ("dynamic dispatch over async resources" rewritten as a tagged variant).
#[derive(Copy, Clone, Debug)]
pub enum AsyncResource {
    Readable(RawFd),
    Writable(RawFd),
    /// `task_id` is caller-chosen and only meaningful to the caller; the
    /// scheduler dispatcher uses it purely to let `stop_wait` find the
    /// registration again.
    Scheduled(u64, Instant),
}

impl AsyncResource {
    pub fn fd(&self) -> Option<RawFd> {
        match *self {
            AsyncResource::Readable(fd) | AsyncResource::Writable(fd) => Some(fd),
            AsyncResource::Scheduled(..) => None,
        }
    }
}
