//! C7 — ChunkedStream (spec.md §4.4), grounded on
//! `original_source/chunked_stream.cpp`'s reader/writer state machine.
//!
//! The reader requires a full CRLF after each chunk's data and after the
//! size line — a bare `\r` does **not** terminate a chunk. (One source
//! file let a lone CR close a chunk; spec.md §9 calls that out as a bug
//! to not carry over.)

use std::io;

use crate::error::{ProtocolError, UError, UResult};
use crate::stream::{Stream, TimedIo};

enum ReadState {
    NeedSize,
    InChunk(usize),
    NeedTrailerCrlf,
    Done,
}

/// HTTP/1.1 chunked transfer coding over a borrowed [`Stream`].
pub struct ChunkedStream<'a, S: TimedIo> {
    inner: &'a Stream<S>,
    read_state: ReadState,
    leftover: Vec<u8>,
    input_closed: bool,
    output_closed: bool,
}

impl<'a, S: TimedIo> ChunkedStream<'a, S> {
    pub fn new(inner: &'a Stream<S>) -> ChunkedStream<'a, S> {
        ChunkedStream {
            inner,
            read_state: ReadState::NeedSize,
            leftover: Vec::new(),
            input_closed: false,
            output_closed: false,
        }
    }

    pub fn input_closed(&self) -> bool {
        self.input_closed
    }

    fn fill(&mut self) -> io::Result<bool> {
        if !self.leftover.is_empty() {
            return Ok(true);
        }
        let view = self.inner.read_sync()?;
        if view.is_empty() {
            return Ok(false);
        }
        self.leftover = view.to_vec();
        Ok(true)
    }

    fn take_line(&mut self) -> UResult<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = find_crlf(&self.leftover) {
                let line = self.leftover[..pos].to_vec();
                self.leftover.drain(..pos + 2);
                return Ok(Some(line));
            }
            if !self.fill().map_err(UError::Io)? {
                return Ok(None);
            }
        }
    }

    /// Reads the next slice of decoded body bytes, or an empty `Vec` at
    /// end-of-body (a size-zero chunk was seen, `input_closed()` is now
    /// true).
    pub fn read(&mut self) -> UResult<Vec<u8>> {
        loop {
            match self.read_state {
                ReadState::Done => return Ok(Vec::new()),
                ReadState::NeedSize => {
                    let line = match self.take_line()? {
                        Some(l) => l,
                        None => return Err(UError::Protocol(ProtocolError::BadChunkHeader)),
                    };
                    let size_str = std::str::from_utf8(&line)
                        .ok()
                        .and_then(|s| s.split(';').next())
                        .map(str::trim)
                        .ok_or(UError::Protocol(ProtocolError::BadChunkHeader))?;
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| UError::Protocol(ProtocolError::BadChunkHeader))?;
                    self.read_state = if size == 0 {
                        ReadState::NeedTrailerCrlf
                    } else {
                        ReadState::InChunk(size)
                    };
                }
                ReadState::InChunk(remaining) => {
                    if remaining == 0 {
                        self.read_state = ReadState::NeedSize;
                        if !self.consume_crlf()? {
                            return Err(UError::Protocol(ProtocolError::BadChunkHeader));
                        }
                        continue;
                    }
                    if self.leftover.is_empty() && !self.fill().map_err(UError::Io)? {
                        return Err(UError::Protocol(ProtocolError::BadChunkHeader));
                    }
                    let take = remaining.min(self.leftover.len());
                    let data: Vec<u8> = self.leftover.drain(..take).collect();
                    self.read_state = ReadState::InChunk(remaining - take);
                    if !data.is_empty() {
                        return Ok(data);
                    }
                }
                ReadState::NeedTrailerCrlf => {
                    // Final "0\r\n" chunk header already consumed; one more
                    // CRLF (the empty trailer section) ends the body.
                    if !self.consume_crlf()? {
                        return Err(UError::Protocol(ProtocolError::BadChunkHeader));
                    }
                    self.read_state = ReadState::Done;
                    self.input_closed = true;
                    if !self.leftover.is_empty() {
                        let rest = std::mem::take(&mut self.leftover);
                        self.inner.put_back(rest);
                    }
                    return Ok(Vec::new());
                }
            }
        }
    }

    fn consume_crlf(&mut self) -> UResult<bool> {
        while self.leftover.len() < 2 {
            if !self.fill().map_err(UError::Io)? {
                return Ok(false);
            }
        }
        if &self.leftover[..2] != b"\r\n" {
            return Err(UError::Protocol(ProtocolError::BadChunkHeader));
        }
        self.leftover.drain(..2);
        Ok(true)
    }

    /// Frames `data` as one chunk: `HEX\r\n<data>\r\n`.
    pub fn write(&mut self, data: &[u8]) -> UResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let header = format!("{:x}\r\n", data.len());
        let mut framed = Vec::with_capacity(header.len() + data.len() + 2);
        framed.extend_from_slice(header.as_bytes());
        framed.extend_from_slice(data);
        framed.extend_from_slice(b"\r\n");
        if !self.inner.write_sync(&framed) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }

    /// Emits the terminating `0\r\n\r\n`. Idempotent.
    pub fn close(&mut self) -> UResult<()> {
        if self.output_closed {
            return Ok(());
        }
        self.output_closed = true;
        if !self.inner.write_sync(b"0\r\n\r\n") {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
