//! C8 — HTTP response composition (spec.md §4.5).

use std::io;

use crate::error::UError;
use crate::http::header::Headers;
use crate::stream::chunked::ChunkedStream;
use crate::stream::limited::LimitedStream;
use crate::stream::{Stream, TimedIo};

/// Builder tracking the structural flags spec.md §4.5 names, so `send()`
/// can decide body framing without re-scanning headers.
pub struct HttpResponseBuilder {
    version: (u8, u8),
    status: Option<(u16, String)>,
    headers: Headers,
    has_content_type: bool,
    has_content_length: bool,
    has_transfer_encoding: bool,
    has_chunked: bool,
    has_connection: bool,
    has_date: bool,
    content_length: Option<u64>,
}

enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    Raw,
}

/// The stream handed back by [`HttpResponseBuilder::send`]; write into it
/// according to the kind `send()` picked.
pub enum ResponseBody<'s, S: TimedIo> {
    Empty,
    Length(LimitedStream<'s, S>),
    Chunked(ChunkedStream<'s, S>),
    Raw(&'s Stream<S>),
}

impl<'s, S: TimedIo> ResponseBody<'s, S> {
    pub fn write(&mut self, data: &[u8]) -> crate::error::UResult<()> {
        match self {
            ResponseBody::Empty => Ok(()),
            ResponseBody::Length(l) => l.write(data),
            ResponseBody::Chunked(c) => c.write(data),
            ResponseBody::Raw(s) => {
                if s.write_sync(data) {
                    Ok(())
                } else {
                    Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")))
                }
            }
        }
    }

    pub fn finish(&mut self) -> crate::error::UResult<()> {
        match self {
            ResponseBody::Empty | ResponseBody::Raw(_) => Ok(()),
            ResponseBody::Length(l) => l.close(),
            ResponseBody::Chunked(c) => c.close(),
        }
    }
}

impl HttpResponseBuilder {
    pub fn new(version: (u8, u8)) -> HttpResponseBuilder {
        HttpResponseBuilder {
            version,
            status: None,
            headers: Headers::new(),
            has_content_type: false,
            has_content_length: false,
            has_transfer_encoding: false,
            has_chunked: false,
            has_connection: false,
            has_date: false,
            content_length: None,
        }
    }

    pub fn status(&mut self, code: u16, reason: &str) -> &mut HttpResponseBuilder {
        self.status = Some((code, reason.to_string()));
        self
    }

    /// Appends a header and updates the structural flags `send()` reads.
    pub fn set(&mut self, key: &str, value: &str) -> &mut HttpResponseBuilder {
        let lower = key.to_ascii_lowercase();
        match lower.as_str() {
            "content-type" => self.has_content_type = true,
            "content-length" => {
                self.has_content_length = true;
                self.content_length = value.trim().parse().ok();
            }
            "transfer-encoding" => {
                self.has_transfer_encoding = true;
                if value.eq_ignore_ascii_case("chunked") {
                    self.has_chunked = true;
                }
            }
            "connection" => self.has_connection = true,
            "date" => self.has_date = true,
            _ => {}
        }
        self.headers.append(key, value);
        self
    }

    /// Decides body encoding and writes the status line + headers,
    /// returning a stream the caller writes the body through.
    pub fn send<'s, S: TimedIo>(
        mut self,
        stream: &'s Stream<S>,
        method: &str,
        keep_alive_allowed: bool,
    ) -> crate::error::UResult<ResponseBody<'s, S>> {
        let (code, reason) = self.status.take().unwrap_or((200, "OK".to_string()));
        let empty_by_contract = code == 204 || code == 304 || method.eq_ignore_ascii_case("HEAD");

        if !self.has_date {
            self.headers.set("Date", &httpdate::fmt_http_date(std::time::SystemTime::now()));
        }
        if !self.has_connection {
            self.headers.set("Connection", if keep_alive_allowed { "keep-alive" } else { "close" });
        }

        let kind = if empty_by_contract {
            BodyKind::Empty
        } else if self.has_content_length {
            BodyKind::Length(self.content_length.unwrap_or(0))
        } else if keep_alive_allowed {
            BodyKind::Chunked
        } else {
            BodyKind::Raw
        };

        match &kind {
            BodyKind::Empty => {}
            BodyKind::Length(_) => {
                if !self.has_content_type {
                    self.headers.set("Content-Type", "application/octet-stream");
                }
            }
            BodyKind::Chunked => {
                if !self.has_content_type {
                    self.headers.set("Content-Type", "application/octet-stream");
                }
                if !self.has_transfer_encoding {
                    self.headers.set("Transfer-Encoding", "chunked");
                }
            }
            BodyKind::Raw => {
                if !self.has_content_type {
                    self.headers.set("Content-Type", "application/octet-stream");
                }
            }
        }

        let mut head = format!("HTTP/{}.{} {} {}\r\n", self.version.0, self.version.1, code, reason);
        for (k, v) in self.headers.iter() {
            head.push_str(k);
            head.push_str(": ");
            head.push_str(v);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        if !stream.write_sync(head.as_bytes()) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }

        Ok(match kind {
            BodyKind::Empty => ResponseBody::Empty,
            BodyKind::Length(n) => ResponseBody::Length(LimitedStream::new(stream, 0, n)),
            BodyKind::Chunked => ResponseBody::Chunked(ChunkedStream::new(stream)),
            BodyKind::Raw => ResponseBody::Raw(stream),
        })
    }
}

/// Emits the interim `100 Continue` status line, per spec.md §4.5 — sent
/// once, before the handler's first body read, when the client asked via
/// `Expect: 100-continue`.
pub fn send_100_continue<S: TimedIo>(stream: &Stream<S>, version: (u8, u8)) -> bool {
    let line = format!("HTTP/{}.{} 100 Continue\r\n\r\n", version.0, version.1);
    stream.write_sync(line.as_bytes())
}
