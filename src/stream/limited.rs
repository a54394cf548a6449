//! C7 — LimitedStream (spec.md §4.4), grounded on
//! `original_source/limited_stream.cpp`'s read/write byte-counting wrapper.

use std::io;

use crate::error::{ProtocolError, UError, UResult};
use crate::stream::{Stream, TimedIo};

/// Caps how many bytes may be read from, or written to, the wrapped
/// stream. Read overflow is put back on the inner stream; write overflow
/// is rejected outright (invariant 2 of spec.md §8).
pub struct LimitedStream<'a, S: TimedIo> {
    inner: &'a Stream<S>,
    read_limit: u64,
    read_done: u64,
    write_limit: u64,
    write_done: u64,
    fill_byte: u8,
}

impl<'a, S: TimedIo> LimitedStream<'a, S> {
    pub fn new(inner: &'a Stream<S>, read_limit: u64, write_limit: u64) -> LimitedStream<'a, S> {
        LimitedStream {
            inner,
            read_limit,
            read_done: 0,
            write_limit,
            write_done: 0,
            fill_byte: 0,
        }
    }

    pub fn with_fill_byte(mut self, fill_byte: u8) -> LimitedStream<'a, S> {
        self.fill_byte = fill_byte;
        self
    }

    pub fn read_remaining(&self) -> u64 {
        self.read_limit.saturating_sub(self.read_done)
    }

    pub fn write_remaining(&self) -> u64 {
        self.write_limit.saturating_sub(self.write_done)
    }

    /// Reads at most `read_remaining()` bytes; returns an empty view once
    /// the limit is reached (does not touch the OS at that point). Any
    /// bytes the inner read returned beyond the limit are put back.
    pub fn read(&mut self) -> io::Result<Vec<u8>> {
        let remaining = self.read_remaining();
        if remaining == 0 {
            return Ok(Vec::new());
        }
        let view = self.inner.read_sync()?;
        let take = (view.len() as u64).min(remaining) as usize;
        let data = view[..take].to_vec();
        if view.len() > take {
            let leftover = view[take..].to_vec();
            drop(view);
            self.inner.put_back(leftover);
        }
        self.read_done += data.len() as u64;
        Ok(data)
    }

    /// Writes `data` if it fits within the remaining write quota;
    /// otherwise returns *write-beyond-limit* and leaves the inner
    /// stream's byte count unchanged (invariant 2).
    pub fn write(&mut self, data: &[u8]) -> UResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() as u64 > self.write_remaining() {
            return Err(UError::Protocol(ProtocolError::WriteBeyondLimit));
        }
        if !self.inner.write_sync(data) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        self.write_done += data.len() as u64;
        Ok(())
    }

    /// Pads any unconsumed write quota with `fill_byte` and drains
    /// whatever unread input bytes remain, preserving framing for the
    /// caller that set up the limit (e.g. a fixed Content-Length body).
    pub fn close(&mut self) -> UResult<()> {
        let pad = self.write_remaining();
        if pad > 0 {
            let filler = vec![self.fill_byte; pad as usize];
            if !self.inner.write_sync(&filler) {
                return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
            }
            self.write_done = self.write_limit;
        }
        while self.read_remaining() > 0 {
            let data = self.read()?;
            if data.is_empty() {
                break;
            }
        }
        Ok(())
    }
}
