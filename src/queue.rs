use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::Arc;

use concurrent_queue::{ConcurrentQueue, PopError, PushError};

use crate::waker::Waker;

/// MPMC queue paired with an eventfd [`Waker`] so it can be polled like any
/// other fd. Grounded on the teacher's `src/queue.rs`; backs the provider's
/// action queue (C5).
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    queue: ConcurrentQueue<T>,
    pending: AtomicUsize,
    waker: Waker,
}

impl<T: Send> Queue<T> {
    pub fn unbounded() -> io::Result<Queue<T>> {
        Ok(Queue {
            inner: Arc::new(Inner {
                queue: ConcurrentQueue::unbounded(),
                pending: AtomicUsize::new(0),
                waker: Waker::new()?,
            }),
        })
    }

    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.inner.queue.push(value)?;
        if self.inner.pending.fetch_add(1, Acquire) == 0 {
            let _ = self.inner.waker.wake();
        }
        Ok(())
    }

    pub fn pop(&self) -> Result<T, PopError> {
        let item = self.inner.queue.pop()?;
        if self.inner.pending.fetch_sub(1, AcqRel) == 1 {
            let _ = self.inner.waker.drain();
        }
        Ok(item)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Relaxed)
    }

    pub fn waker(&self) -> Waker {
        self.inner.waker.clone()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Queue<T> {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> AsRawFd for Queue<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.waker.as_raw_fd()
    }
}
