//! C5 — Async Provider (spec.md §4.2).
//!
//! Grounded on `original_source/async_provider.h`'s `IAsyncProvider`
//! contract (`worker()` processes exactly one unit per call) and the
//! teacher's `src/queue.rs` for the immediate-action path.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use log::{debug, warn};

use crate::dispatcher::epoll::EpollDispatcher;
use crate::dispatcher::poll::PollDispatcher;
use crate::dispatcher::scheduler::SchedulerDispatcher;
use crate::dispatcher::{Callback, Dispatcher};
use crate::error::{UError, UResult};
use crate::queue::Queue;
use crate::resource::AsyncResource;

/// A unit of immediate work submitted via [`AsyncProvider::post`].
pub type Action = Box<dyn FnOnce() + Send>;

const PANIC_RING_CAP: usize = 32;

/// A panic captured from a user callback or action, per Design Notes §9
/// ("exceptions thrown from async callbacks must not take down the
/// worker thread").
pub struct CapturedPanic {
    pub message: String,
    pub at_worker: usize,
}

/// Which dispatcher implementations to stand up.
pub struct AsyncProviderConfig {
    pub epoll_dispatchers: usize,
    pub poll_dispatchers: usize,
    pub scheduler: bool,
    pub threads: usize,
}

impl Default for AsyncProviderConfig {
    fn default() -> AsyncProviderConfig {
        AsyncProviderConfig {
            epoll_dispatchers: 1,
            poll_dispatchers: 0,
            scheduler: true,
            threads: 4,
        }
    }
}

struct Inner {
    dispatchers: Vec<Arc<dyn Dispatcher>>,
    next: AtomicUsize,
    actions: Queue<Action>,
    panics: Mutex<VecDeque<CapturedPanic>>,
    stopped: AtomicBool,
}

/// Owns a pool of [`Dispatcher`]s and an action queue; worker threads call
/// [`AsyncProvider::worker`] in a loop, each call doing exactly one unit of
/// work (one action, or one dispatcher task).
#[derive(Clone)]
pub struct AsyncProvider {
    inner: Arc<Inner>,
}

thread_local! {
    static CURRENT: RefCell<Option<AsyncProvider>> = const { RefCell::new(None) };
}

static DEFAULT_PROVIDER: OnceLock<AsyncProvider> = OnceLock::new();

impl AsyncProvider {
    pub fn new(config: AsyncProviderConfig) -> std::io::Result<AsyncProvider> {
        let mut dispatchers: Vec<Arc<dyn Dispatcher>> = Vec::new();
        for _ in 0..config.epoll_dispatchers {
            dispatchers.push(Arc::new(EpollDispatcher::new()?));
        }
        for _ in 0..config.poll_dispatchers {
            dispatchers.push(Arc::new(PollDispatcher::new()?));
        }
        if config.scheduler {
            dispatchers.push(Arc::new(SchedulerDispatcher::new()));
        }
        if dispatchers.is_empty() {
            dispatchers.push(Arc::new(EpollDispatcher::new()?));
        }
        Ok(AsyncProvider {
            inner: Arc::new(Inner {
                dispatchers,
                next: AtomicUsize::new(0),
                actions: Queue::unbounded()?,
                panics: Mutex::new(VecDeque::new()),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Install `self` as the current-thread provider (teacher idiom: a
    /// thread-local, never an implicit global).
    pub fn make_current(&self) {
        CURRENT.with(|c| *c.borrow_mut() = Some(self.clone()));
    }

    pub fn current() -> Option<AsyncProvider> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Process-wide default, lazily created on first use and shared by
    /// anything that didn't call [`make_current`].
    pub fn default_provider() -> &'static AsyncProvider {
        DEFAULT_PROVIDER.get_or_init(|| {
            AsyncProvider::new(AsyncProviderConfig::default()).expect("failed to create default async provider")
        })
    }

    /// Register `resource`; tries each dispatcher in round-robin order until
    /// one accepts it.
    pub fn wait_async(&self, resource: AsyncResource, deadline: Instant, callback: Callback) -> UResult<()> {
        let dispatchers = &self.inner.dispatchers;
        let n = dispatchers.len();
        let start = self.inner.next.fetch_add(1, Ordering::Relaxed) % n;
        let mut callback = callback;
        for i in 0..n {
            let d = &dispatchers[(start + i) % n];
            match d.wait_async(resource, callback, deadline) {
                None => return Ok(()),
                Some(back) => callback = back,
            }
        }
        let _ = callback;
        Err(UError::NoDispatcher)
    }

    /// Submit `action` to run on whichever worker picks it up next.
    pub fn post(&self, action: Action) {
        if self.inner.actions.push(action).is_err() {
            warn!("async provider: action queue rejected push after stop");
        }
    }

    /// Process exactly one unit of work: one queued action, or one ready
    /// dispatcher task. Blocks if nothing is ready. Returns `false` once
    /// [`stop`](Self::stop) has drained everything and there is truly
    /// nothing left, so the caller's worker loop can exit.
    pub fn worker(&self) -> bool {
        if let Ok(action) = self.inner.actions.pop() {
            self.run_guarded(0, action);
            return true;
        }

        let n = self.inner.dispatchers.len();
        let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % n;
        let dispatcher = self.inner.dispatchers[idx].clone();
        match dispatcher.get_task() {
            Some(task) => {
                let success = task.success;
                self.run_guarded(idx, Box::new(move || (task.callback)(success)));
                true
            }
            None => !self.inner.stopped.load(Ordering::Acquire),
        }
    }

    fn run_guarded(&self, worker_slot: usize, action: Action) {
        let result = panic::catch_unwind(AssertUnwindSafe(action));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!("async provider: callback panicked: {message}");
            let mut panics = self.inner.panics.lock().unwrap();
            if panics.len() == PANIC_RING_CAP {
                panics.pop_front();
            }
            panics.push_back(CapturedPanic { message, at_worker: worker_slot });
        }
    }

    /// Drain captured panics for inspection (e.g. by a health endpoint).
    pub fn take_panics(&self) -> Vec<CapturedPanic> {
        let mut panics = self.inner.panics.lock().unwrap();
        panics.drain(..).collect()
    }

    /// Cancel every pending registration and action, then mark stopped.
    /// Idempotent; safe to call from any thread, including from inside a
    /// callback running on one of this provider's own workers.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        for d in &self.inner.dispatchers {
            d.stop();
        }
        debug!("async provider: stopped {} dispatcher(s)", self.inner.dispatchers.len());
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn dispatcher_count(&self) -> usize {
        self.inner.dispatchers.len()
    }
}

/// Spawn `threads` OS threads each looping `worker()` until it returns
/// `false`, installing `provider` as their thread-local current provider
/// first. Mirrors `original_source/async_provider.cpp`'s thread pool.
pub fn run_worker_threads(provider: &AsyncProvider, threads: usize) -> Vec<std::thread::JoinHandle<()>> {
    (0..threads.max(1))
        .map(|i| {
            let provider = provider.clone();
            std::thread::Builder::new()
                .name(format!("nanoserve-worker-{i}"))
                .spawn(move || {
                    provider.make_current();
                    while provider.worker() {}
                })
                .expect("failed to spawn worker thread")
        })
        .collect()
}
