//! C8 — HTTP request parsing (spec.md §4.5).

use std::io;

use crate::error::{ProtocolError, UError, UResult};
use crate::http::header::{HeaderEndDetector, Headers};
use crate::stream::{Stream, TimedIo};

const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// How the request body is framed, selected per spec.md §4.5's rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
}

pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: (u8, u8),
    pub headers: Headers,
    pub body: BodyKind,
}

impl HttpRequest {
    pub fn keep_alive_requested(&self) -> bool {
        match self.headers.get("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            // HTTP/1.1 defaults to keep-alive, HTTP/1.0 defaults to close
            // (the correct, non-inverted polarity — spec.md §9).
            _ => self.version >= (1, 1),
        }
    }

    /// `true` if the client asked for 100-continue. Any other `Expect`
    /// value was already rejected with a 417 during parsing, so by the
    /// time a request reaches a handler this can't return a spurious
    /// `false` for an unsupported expectation.
    pub fn wants_100_continue(&self) -> bool {
        self.headers.get("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }
}

/// Rejects any `Expect` value other than `100-continue` at parse time
/// (spec.md §4.5), mirroring `processHeaders()`'s `sendErrorPage(417)` in
/// the original — a handler must not be able to dodge the 417 by never
/// calling `read_body()`.
fn validate_expect(headers: &Headers) -> UResult<()> {
    match headers.get("expect") {
        None => Ok(()),
        Some(v) if v.eq_ignore_ascii_case("100-continue") => Ok(()),
        Some(v) => Err(UError::Protocol(ProtocolError::ExpectationFailed(v.to_string()))),
    }
}

/// Reads and parses one request's header block from `stream`. Leftover
/// bytes read past the terminator are put back for the body reader.
/// Returns `Ok(None)` on a clean EOF before any byte arrived (the normal
/// end of a keep-alive connection).
pub fn parse_request<S: TimedIo>(
    stream: &Stream<S>,
    max_header_bytes: Option<usize>,
) -> UResult<Option<HttpRequest>> {
    let limit = max_header_bytes.unwrap_or(DEFAULT_MAX_HEADER_BYTES);
    let mut detector = HeaderEndDetector::new();
    let mut buf = Vec::new();

    loop {
        let view = stream.read_sync().map_err(UError::Io)?;
        if view.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(UError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-header",
            )));
        }
        let start = buf.len();
        buf.extend_from_slice(&view);
        drop(view);
        if buf.len() > limit {
            return Err(UError::Protocol(ProtocolError::HeaderTooLarge));
        }
        if let Some(end_in_chunk) = detector.feed(&buf[start..]) {
            let end = start + end_in_chunk;
            let leftover = buf[end..].to_vec();
            buf.truncate(end);
            if !leftover.is_empty() {
                stream.put_back(leftover);
            }
            return parse_head_bytes(&buf).map(Some);
        }
    }
}

fn parse_head_bytes(buf: &[u8]) -> UResult<HttpRequest> {
    let text =
        std::str::from_utf8(buf).map_err(|_| UError::Protocol(ProtocolError::BadRequestLine))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split(' ').filter(|s| !s.is_empty());
    let method = parts
        .next()
        .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?
        .to_ascii_uppercase();
    let target = parts
        .next()
        .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?
        .to_string();
    let version_str = parts
        .next()
        .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?;
    let version = parse_version(version_str)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?;
        headers.append(k.trim(), v.trim());
    }

    validate_expect(&headers)?;
    let body = select_body_kind(&method, &headers)?;
    Ok(HttpRequest { method, target, version, headers, body })
}

fn parse_version(s: &str) -> UResult<(u8, u8)> {
    let upper = s.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("HTTP/")
        .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?;
    let (maj, min) = rest
        .split_once('.')
        .ok_or(UError::Protocol(ProtocolError::BadRequestLine))?;
    let maj: u8 = maj.parse().map_err(|_| UError::Protocol(ProtocolError::BadRequestLine))?;
    let min: u8 = min.parse().map_err(|_| UError::Protocol(ProtocolError::BadRequestLine))?;
    Ok((maj, min))
}

fn select_body_kind(method: &str, headers: &Headers) -> UResult<BodyKind> {
    if let Some(te) = headers.get("transfer-encoding") {
        if te.eq_ignore_ascii_case("chunked") {
            return Ok(BodyKind::Chunked);
        }
        return Err(UError::Protocol(ProtocolError::LengthRequired));
    }
    if let Some(cl) = headers.get("content-length") {
        let n: u64 = cl
            .trim()
            .parse()
            .map_err(|_| UError::Protocol(ProtocolError::BadRequestLine))?;
        if n > 0 {
            return Ok(BodyKind::Length(n));
        }
        return Ok(BodyKind::Empty);
    }
    let _ = method; // GET/HEAD and anything else with no framing header: empty body.
    Ok(BodyKind::Empty)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_parses() {
        assert_eq!(parse_version("HTTP/1.1").unwrap(), (1, 1));
        assert_eq!(parse_version("http/1.0").unwrap(), (1, 0));
        assert!(parse_version("bogus").is_err());
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let mut headers = Headers::new();
        headers.append("Host", "x");
        let req = HttpRequest {
            method: "GET".into(),
            target: "/".into(),
            version: (1, 0),
            headers: headers.clone(),
            body: BodyKind::Empty,
        };
        assert!(!req.keep_alive_requested());

        let req11 = HttpRequest { version: (1, 1), ..req };
        assert!(req11.keep_alive_requested());
    }

    #[test]
    fn validate_expect_rejects_anything_but_100_continue() {
        let mut ok = Headers::new();
        ok.append("Expect", "100-continue");
        assert!(validate_expect(&ok).is_ok());

        let mut bad = Headers::new();
        bad.append("Expect", "gzip");
        let err = validate_expect(&bad).unwrap_err();
        assert!(matches!(err, UError::Protocol(ProtocolError::ExpectationFailed(_))));
        assert_eq!(err.protocol_status(), Some((417, "Expectation Failed")));
    }

    #[test]
    fn parse_head_bytes_surfaces_417_before_any_handler_runs() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\nExpect: gzip\r\n\r\n";
        let err = parse_head_bytes(raw).unwrap_err();
        assert_eq!(err.protocol_status(), Some((417, "Expectation Failed")));
    }

    #[test]
    fn body_kind_requires_content_length_without_chunked_te() {
        let mut headers = Headers::new();
        headers.append("Transfer-Encoding", "gzip");
        let err = select_body_kind("POST", &headers).unwrap_err();
        assert!(matches!(err, UError::Protocol(ProtocolError::LengthRequired)));
    }
}
