//! C6 — Stream (spec.md §4.3): a buffered, timeout-aware byte stream over
//! any socket-like object.
//!
//! Reads/writes go straight to the fd via raw `read(2)`/`write(2)` (like
//! `sys/fd.rs`'s wrappers) rather than through `S`'s own `Read`/`Write`
//! impls, so the single-reader/single-writer *invariant* (debug-asserted,
//! not enforced) doesn't also have to fight Rust's `&mut self` aliasing
//! rules — readiness on the same fd from two threads is fine at the OS
//! level, it's the framing above it that must not interleave.

pub mod chunked;
pub mod limited;

use std::cell::{Cell, Ref, RefCell};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::dispatcher::Callback;
use crate::provider::AsyncProvider;
use crate::resource::AsyncResource;
use crate::sys::syscall;

const INITIAL_BUF: usize = 4096;
const DEFAULT_MAX_BUF: usize = 1 << 20;

/// Anything a [`Stream`] can sit on top of: a raw fd plus the sticky
/// per-direction timeout bookkeeping spec.md §3 assigns to the socket
/// handle. Implemented by [`crate::socket::SocketHandle`].
pub trait TimedIo: AsRawFd + Send + Sync {
    fn set_timed_out(&self, v: bool);
    fn timed_out(&self) -> bool;
    fn read_timeout_ms(&self) -> i64;
    fn write_timeout_ms(&self) -> i64;
    fn close_input(&self) -> io::Result<()>;
    fn close_output(&self) -> io::Result<()>;
}

impl TimedIo for crate::socket::SocketHandle {
    fn set_timed_out(&self, v: bool) {
        crate::socket::SocketHandle::set_timed_out(self, v)
    }
    fn timed_out(&self) -> bool {
        crate::socket::SocketHandle::timed_out(self)
    }
    fn read_timeout_ms(&self) -> i64 {
        crate::socket::SocketHandle::read_timeout_ms(self)
    }
    fn write_timeout_ms(&self) -> i64 {
        crate::socket::SocketHandle::write_timeout_ms(self)
    }
    fn close_input(&self) -> io::Result<()> {
        crate::socket::SocketHandle::close_input(self)
    }
    fn close_output(&self) -> io::Result<()> {
        crate::socket::SocketHandle::close_output(self)
    }
}

struct PendingWrite {
    buf: Vec<u8>,
    offset: usize,
    callback: Callback,
}

/// A view into the stream's read buffer, valid until the next read call.
pub struct ReadView<'a> {
    guard: Ref<'a, Vec<u8>>,
    start: usize,
    end: usize,
}

impl std::ops::Deref for ReadView<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard[self.start..self.end]
    }
}

struct FlagGuard<'a>(&'a Cell<bool>);
impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct Stream<S: TimedIo> {
    io: S,
    provider: AsyncProvider,
    buf: RefCell<Vec<u8>>,
    buf_len: Cell<usize>,
    max_buf: usize,
    put_back: RefCell<Option<Vec<u8>>>,
    reading: Cell<bool>,
    writing: Cell<bool>,
    write_queue: Mutex<VecDeque<PendingWrite>>,
    flushing: AtomicBool,
    errored: AtomicBool,
    input_closed: Cell<bool>,
    output_closed: Cell<bool>,
    read_cancelled: AtomicBool,
}

// Only the write queue and the atomics are touched across threads by
// construction; `Cell`/`RefCell` fields are only touched under the
// single-reader/single-writer invariant the caller is responsible for.
unsafe impl<S: TimedIo> Sync for Stream<S> {}

impl<S: TimedIo> Stream<S> {
    pub fn new(io: S, provider: AsyncProvider) -> Arc<Stream<S>> {
        Stream::with_capacity(io, provider, INITIAL_BUF, DEFAULT_MAX_BUF)
    }

    pub fn with_capacity(io: S, provider: AsyncProvider, initial: usize, max_buf: usize) -> Arc<Stream<S>> {
        Arc::new(Stream {
            io,
            provider,
            buf: RefCell::new(vec![0u8; initial]),
            buf_len: Cell::new(0),
            max_buf,
            put_back: RefCell::new(None),
            reading: Cell::new(false),
            writing: Cell::new(false),
            write_queue: Mutex::new(VecDeque::new()),
            flushing: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            input_closed: Cell::new(false),
            output_closed: Cell::new(false),
            read_cancelled: AtomicBool::new(false),
        })
    }

    pub fn inner(&self) -> &S {
        &self.io
    }

    fn raw_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.io.as_raw_fd();
        match syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())) {
            Ok(n) => Ok(n as usize),
            Err(e) => Err(e),
        }
    }

    fn raw_write(&self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.io.as_raw_fd();
        match syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len())) {
            Ok(n) => Ok(n as usize),
            Err(e) => Err(e),
        }
    }

    fn would_block(e: &io::Error) -> bool {
        e.kind() == io::ErrorKind::WouldBlock
    }

    fn poll_ready(&self, writable: bool, timeout: Option<Duration>) -> io::Result<bool> {
        let mut pfd = crate::sys::poll::pollfd(
            self.io.as_raw_fd(),
            if writable { libc::POLLOUT } else { libc::POLLIN },
        );
        let n = crate::sys::poll::poll(std::slice::from_mut(&mut pfd), timeout)?;
        Ok(n > 0)
    }

    fn timeout_duration(ms: i64) -> Option<Duration> {
        if ms < 0 {
            None
        } else {
            Some(Duration::from_millis(ms as u64))
        }
    }

    /// Blocking read: grows the buffer ×1.5 (capped at `max_buf`) if the
    /// previous read filled it completely. Returns an empty view on
    /// timeout or EOF — check `inner().timed_out()` to tell them apart.
    pub fn read_sync(&self) -> io::Result<ReadView<'_>> {
        debug_assert!(!self.reading.get(), "concurrent read on Stream");
        self.reading.set(true);
        let _guard = FlagGuard(&self.reading);

        if let Some(pb) = self.put_back.borrow_mut().take() {
            let mut buf = self.buf.borrow_mut();
            let n = pb.len();
            if buf.len() < n {
                buf.resize(n, 0);
            }
            buf[..n].copy_from_slice(&pb);
            drop(buf);
            self.buf_len.set(n);
            return Ok(self.view());
        }

        if self.input_closed.get() {
            self.buf_len.set(0);
            return Ok(self.view());
        }

        let full_before = {
            let buf = self.buf.borrow();
            self.buf_len.get() == buf.len()
        };
        if full_before {
            self.grow_buffer();
        }

        let timeout = Self::timeout_duration(self.io.read_timeout_ms());
        loop {
            let n = {
                let mut buf = self.buf.borrow_mut();
                self.raw_read(&mut buf[..])
            };
            match n {
                Ok(n) => {
                    self.io.set_timed_out(false);
                    self.buf_len.set(n);
                    return Ok(self.view());
                }
                Err(e) if Self::would_block(&e) => {
                    if !self.poll_ready(false, timeout)? {
                        self.io.set_timed_out(true);
                        self.buf_len.set(0);
                        return Ok(self.view());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Never touches the OS: returns put-back data if present, else empty.
    pub fn read_nonblocking(&self) -> ReadView<'_> {
        if let Some(pb) = self.put_back.borrow_mut().take() {
            let mut buf = self.buf.borrow_mut();
            let n = pb.len();
            if buf.len() < n {
                buf.resize(n, 0);
            }
            buf[..n].copy_from_slice(&pb);
            drop(buf);
            self.buf_len.set(n);
        } else {
            self.buf_len.set(0);
        }
        self.view()
    }

    fn view(&self) -> ReadView<'_> {
        ReadView {
            guard: self.buf.borrow(),
            start: 0,
            end: self.buf_len.get(),
        }
    }

    fn grow_buffer(&self) {
        let mut buf = self.buf.borrow_mut();
        let grown = ((buf.len() as f64) * 1.5) as usize;
        let new_len = grown.min(self.max_buf).max(buf.len() + 1);
        if new_len > buf.len() {
            buf.resize(new_len, 0);
        }
    }

    /// Store `data` to be handed back, unmodified, by the next read call
    /// without touching the OS.
    pub fn put_back(&self, data: Vec<u8>) {
        *self.put_back.borrow_mut() = Some(data);
    }

    /// Asynchronous read: registers fd readiness with the provider; on
    /// fire, copies the received bytes into an owned `Vec<u8>` passed to
    /// `callback`. `Ok(None)` means timeout/cancellation, `Ok(Some(v))`
    /// with `v.is_empty()` means clean EOF.
    pub fn read_async(
        self: &Arc<Self>,
        deadline: Instant,
        callback: impl FnOnce(io::Result<Option<Vec<u8>>>) + Send + 'static,
    ) {
        debug_assert!(!self.reading.get(), "concurrent read_async on Stream");
        self.reading.set(true);

        if let Some(pb) = self.put_back.borrow_mut().take() {
            self.reading.set(false);
            callback(Ok(Some(pb)));
            return;
        }
        if self.input_closed.get() {
            self.reading.set(false);
            callback(Ok(Some(Vec::new())));
            return;
        }

        self.read_cancelled.store(false, Ordering::Release);
        let this = self.clone();
        let fd = self.io.as_raw_fd();
        let result = self.provider.wait_async(
            AsyncResource::Readable(fd),
            deadline,
            Box::new(move |success| {
                this.reading.set(false);
                if this.read_cancelled.load(Ordering::Acquire) || !success {
                    this.io.set_timed_out(!success);
                    callback(Ok(None));
                    return;
                }
                let mut buf = this.buf.borrow_mut();
                match this.raw_read(&mut buf[..]) {
                    Ok(n) => {
                        this.io.set_timed_out(false);
                        callback(Ok(Some(buf[..n].to_vec())));
                    }
                    Err(e) if Self::would_block(&e) => callback(Ok(None)),
                    Err(e) => callback(Err(e)),
                }
            }),
        );
        if result.is_err() {
            self.reading.set(false);
        }
    }

    /// Cancels a pending `read_async` at the next opportunity, delivering
    /// `success = false` to its callback.
    pub fn timeout_async_read(&self) {
        self.read_cancelled.store(true, Ordering::Release);
    }

    /// Blocking write: loops on short writes. Returns `false` (sticky) on
    /// any error.
    pub fn write_sync(&self, data: &[u8]) -> bool {
        debug_assert!(!self.writing.get(), "concurrent write on Stream");
        self.writing.set(true);
        let _guard = FlagGuard(&self.writing);

        if self.errored.load(Ordering::Acquire) || self.output_closed.get() {
            return false;
        }
        let timeout = Self::timeout_duration(self.io.write_timeout_ms());
        let mut offset = 0;
        while offset < data.len() {
            match self.raw_write(&data[offset..]) {
                Ok(n) => offset += n,
                Err(e) if Self::would_block(&e) => match self.poll_ready(true, timeout) {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.io.set_timed_out(true);
                        return false;
                    }
                    Err(_) => {
                        self.errored.store(true, Ordering::Release);
                        return false;
                    }
                },
                Err(_) => {
                    self.errored.store(true, Ordering::Release);
                    return false;
                }
            }
        }
        true
    }

    /// Asynchronous write: FIFO-queued so concurrent callers' bytes never
    /// interleave on the wire and each callback fires exactly once, in
    /// submission order (spec.md §8 invariant 4).
    pub fn write_async(self: &Arc<Self>, data: Vec<u8>, callback: Callback) {
        if self.errored.load(Ordering::Acquire) {
            callback(false);
            return;
        }
        if data.is_empty() {
            callback(true);
            return;
        }
        {
            let mut q = self.write_queue.lock().unwrap();
            q.push_back(PendingWrite { buf: data, offset: 0, callback });
        }
        if !self.flushing.swap(true, Ordering::AcqRel) {
            self.pump(Instant::now() + Duration::from_secs(3600));
        }
    }

    fn pump(self: &Arc<Self>, deadline: Instant) {
        loop {
            let mut pw = {
                let mut q = self.write_queue.lock().unwrap();
                match q.pop_front() {
                    Some(pw) => pw,
                    None => {
                        self.flushing.store(false, Ordering::Release);
                        return;
                    }
                }
            };
            loop {
                match self.raw_write(&pw.buf[pw.offset..]) {
                    Ok(n) => {
                        pw.offset += n;
                        if pw.offset >= pw.buf.len() {
                            (pw.callback)(true);
                            break;
                        }
                    }
                    Err(e) if Self::would_block(&e) => {
                        let this = self.clone();
                        let result = self.provider.wait_async(
                            AsyncResource::Writable(self.io.as_raw_fd()),
                            deadline,
                            Box::new(move |success| {
                                if success {
                                    let mut q = this.write_queue.lock().unwrap();
                                    q.push_front(pw);
                                    drop(q);
                                    this.pump(deadline);
                                } else {
                                    this.errored.store(true, Ordering::Release);
                                    (pw.callback)(false);
                                    this.fail_remaining();
                                }
                            }),
                        );
                        if result.is_err() {
                            self.errored.store(true, Ordering::Release);
                        }
                        return;
                    }
                    Err(_) => {
                        self.errored.store(true, Ordering::Release);
                        (pw.callback)(false);
                        self.fail_remaining();
                        return;
                    }
                }
            }
        }
    }

    fn fail_remaining(&self) {
        let mut q = self.write_queue.lock().unwrap();
        while let Some(pw) = q.pop_front() {
            (pw.callback)(false);
        }
        self.flushing.store(false, Ordering::Release);
    }

    /// Closes input; idempotent. Cancels any pending `read_async`.
    pub fn close_input(&self) -> io::Result<()> {
        if self.input_closed.replace(true) {
            return Ok(());
        }
        self.timeout_async_read();
        trace!("stream: closing input for fd {}", self.io.as_raw_fd());
        self.io.close_input()
    }

    /// Closes output; idempotent. Flushes the buffered write queue first
    /// by blocking until `flushing` clears.
    pub fn close_output(&self) -> io::Result<()> {
        if self.output_closed.replace(true) {
            return Ok(());
        }
        while self.flushing.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        trace!("stream: closing output for fd {}", self.io.as_raw_fd());
        self.io.close_output()
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }
}
