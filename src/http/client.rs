//! C10 — HTTP client (spec.md §4.7).

use std::io;
use std::sync::Arc;

use crate::addr::Endpoint;
use crate::error::{ProtocolError, UError, UResult};
use crate::http::header::{HeaderEndDetector, Headers};
use crate::provider::AsyncProvider;
use crate::socket::SocketHandle;
use crate::stream::chunked::ChunkedStream;
use crate::stream::limited::LimitedStream;
use crate::stream::Stream;

const STAGING_THRESHOLD: usize = 1024;
const STAGING_FLUSH_AT: usize = 4096;

pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub version: (u8, u8),
    pub headers: Headers,
}

/// How the response body is framed, decided the same way the server
/// decides a request's (spec.md §4.7 "response parsing mirrors the
/// server parser").
#[derive(Clone, Copy, Debug)]
pub enum ClientBodyKind {
    Length(u64),
    Chunked,
    UntilClose,
}

impl ClientBodyKind {
    fn select(method: &str, response: &HttpResponse) -> ClientBodyKind {
        if method.eq_ignore_ascii_case("HEAD") || response.status == 204 || response.status == 304 {
            return ClientBodyKind::Length(0);
        }
        if let Some(te) = response.headers.get("transfer-encoding") {
            if te.eq_ignore_ascii_case("chunked") {
                return ClientBodyKind::Chunked;
            }
        }
        if let Some(cl) = response.headers.get("content-length") {
            if let Ok(n) = cl.trim().parse::<u64>() {
                return ClientBodyKind::Length(n);
            }
        }
        ClientBodyKind::UntilClose
    }
}

/// Reads the whole response body into memory per `kind`.
pub fn read_body_to_end(stream: &Stream<SocketHandle>, kind: ClientBodyKind) -> UResult<Vec<u8>> {
    let mut out = Vec::new();
    match kind {
        ClientBodyKind::Length(n) => {
            let mut limited = LimitedStream::new(stream, n, 0);
            loop {
                let chunk = limited.read().map_err(UError::Io)?;
                if chunk.is_empty() {
                    break;
                }
                out.extend(chunk);
            }
        }
        ClientBodyKind::Chunked => {
            let mut chunked = ChunkedStream::new(stream);
            loop {
                let chunk = chunked.read()?;
                if chunk.is_empty() && chunked.input_closed() {
                    break;
                }
                out.extend(chunk);
            }
        }
        ClientBodyKind::UntilClose => loop {
            let view = stream.read_sync().map_err(UError::Io)?;
            if view.is_empty() {
                break;
            }
            out.extend_from_slice(&view);
        },
    }
    Ok(out)
}

/// A request under construction; writes directly into the connection's
/// stream rather than a full in-memory buffer, except small body pieces
/// which get coalesced in a staging buffer (spec.md §4.7).
pub struct HttpClientRequest {
    stream: Arc<Stream<SocketHandle>>,
    method: String,
    headers_sent: bool,
    header_lines: Vec<String>,
    staging: Vec<u8>,
}

impl HttpClientRequest {
    /// Resolves `endpoint`, connects, and starts a request line for
    /// `method path`.
    pub fn open(provider: AsyncProvider, endpoint: &Endpoint, method: &str, path: &str) -> UResult<HttpClientRequest> {
        let sock = SocketHandle::connect(endpoint).map_err(UError::Io)?;
        let stream = Stream::new(sock, provider);
        let request_line = format!("{} {} HTTP/1.1\r\n", method.to_ascii_uppercase(), path);
        Ok(HttpClientRequest {
            stream,
            method: method.to_ascii_uppercase(),
            headers_sent: false,
            header_lines: vec![request_line],
            staging: Vec::new(),
        })
    }

    pub fn add_header(&mut self, key: &str, value: &str) -> &mut HttpClientRequest {
        self.header_lines.push(format!("{}: {}\r\n", key, value));
        self
    }

    pub fn set_body_length(&mut self, len: u64) -> &mut HttpClientRequest {
        self.add_header("Content-Length", &len.to_string());
        self
    }

    /// Flushes the header block. Must run before `write_body`.
    pub fn begin_body(&mut self) -> UResult<()> {
        if self.headers_sent {
            return Ok(());
        }
        self.headers_sent = true;
        let mut head = self.header_lines.concat();
        head.push_str("\r\n");
        if !self.stream.write_sync(head.as_bytes()) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }

    /// Coalesces small writes in a staging buffer (threshold ~1 KiB),
    /// flushing once it reaches ~4 KiB or on explicit `flush`.
    pub fn write_body(&mut self, data: &[u8]) -> UResult<()> {
        debug_assert!(self.headers_sent, "begin_body must run before write_body");
        if data.len() >= STAGING_THRESHOLD {
            self.flush_staging()?;
            if !self.stream.write_sync(data) {
                return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
            }
            return Ok(());
        }
        self.staging.extend_from_slice(data);
        if self.staging.len() >= STAGING_FLUSH_AT {
            self.flush_staging()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> UResult<()> {
        self.flush_staging()
    }

    fn flush_staging(&mut self) -> UResult<()> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.staging);
        if !self.stream.write_sync(&data) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }

    /// Sends the request (flushing any staged body bytes), parses the
    /// response status line + headers, and hands back the still-open
    /// stream plus the body kind so the caller can read it with
    /// [`read_body_to_end`] or its own `LimitedStream`/`ChunkedStream`.
    pub fn send(mut self) -> UResult<(HttpResponse, Arc<Stream<SocketHandle>>, ClientBodyKind)> {
        self.begin_body()?;
        self.flush_staging()?;
        let response = parse_status_and_headers(&self.stream)?;
        let kind = ClientBodyKind::select(&self.method, &response);
        Ok((response, self.stream, kind))
    }
}

fn parse_status_and_headers(stream: &Stream<SocketHandle>) -> UResult<HttpResponse> {
    let mut detector = HeaderEndDetector::new();
    let mut buf = Vec::new();
    loop {
        let view = stream.read_sync().map_err(UError::Io)?;
        if view.is_empty() {
            return Err(UError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-response")));
        }
        let start = buf.len();
        buf.extend_from_slice(&view);
        drop(view);
        if let Some(end_in_chunk) = detector.feed(&buf[start..]) {
            let end = start + end_in_chunk;
            let leftover = buf[end..].to_vec();
            buf.truncate(end);
            if !leftover.is_empty() {
                stream.put_back(leftover);
            }
            return parse_status_bytes(&buf);
        }
    }
}

fn parse_status_bytes(buf: &[u8]) -> UResult<HttpResponse> {
    let text = std::str::from_utf8(buf).map_err(|_| UError::Protocol(ProtocolError::BadStatusLine))?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let mut parts = status_line.splitn(3, ' ');
    let version_str = parts.next().ok_or(UError::Protocol(ProtocolError::BadStatusLine))?;
    let code_str = parts.next().ok_or(UError::Protocol(ProtocolError::BadStatusLine))?;
    let reason = parts.next().unwrap_or("").to_string();

    let version = {
        let upper = version_str.to_ascii_uppercase();
        let rest = upper.strip_prefix("HTTP/").ok_or(UError::Protocol(ProtocolError::BadStatusLine))?;
        let (maj, min) = rest.split_once('.').ok_or(UError::Protocol(ProtocolError::BadStatusLine))?;
        (
            maj.parse().map_err(|_| UError::Protocol(ProtocolError::BadStatusLine))?,
            min.parse().map_err(|_| UError::Protocol(ProtocolError::BadStatusLine))?,
        )
    };
    let status: u16 = code_str.parse().map_err(|_| UError::Protocol(ProtocolError::BadStatusLine))?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (k, v) = line.split_once(':').ok_or(UError::Protocol(ProtocolError::BadStatusLine))?;
        headers.append(k.trim(), v.trim());
    }

    Ok(HttpResponse { status, reason, version, headers })
}
