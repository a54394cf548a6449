//! C11 — WebSocket codec (spec.md §4.8), grounded on
//! `original_source/websockets_parser.h`'s `WebSocketParser`/
//! `WebSocketSerializer` state machine and `websockets_stream.h`'s
//! `WSStream` wrapper over the core `Stream`.

use std::io;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{ProtocolError, UError, UResult};
use crate::http::header::Headers;
use crate::stream::{Stream, TimedIo};

const MAX_PAYLOAD: u64 = (1u64 << 56) - 1;
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(b: u8) -> UResult<OpCode> {
        match b {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(UError::Protocol(ProtocolError::BadHandshake)),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A fully decoded frame. `close_code` is only populated for `OpCode::Close`
/// frames that carried the optional 2-byte big-endian code.
#[derive(Clone, Debug)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub close_code: Option<u16>,
}

enum ParseState {
    Header,
    ExtLen16,
    ExtLen64,
    MaskKey,
    Payload,
}

/// `opcode → size → size-extension → mask-key → payload` decoder (spec.md
/// §4.8). Reads from the stream's leftover buffer the same way
/// [`crate::stream::chunked::ChunkedStream`] does: pull a chunk via
/// `read_sync`, consume what's needed, put back the rest.
pub struct FrameParser<'a, S: TimedIo> {
    inner: &'a Stream<S>,
    leftover: Vec<u8>,
    state: ParseState,
    fin: bool,
    opcode: OpCode,
    masked: bool,
    mask_key: [u8; 4],
    len: u64,
    payload: Vec<u8>,
    frag_opcode: OpCode,
}

impl<'a, S: TimedIo> FrameParser<'a, S> {
    pub fn new(inner: &'a Stream<S>) -> FrameParser<'a, S> {
        FrameParser {
            inner,
            leftover: Vec::new(),
            state: ParseState::Header,
            fin: true,
            opcode: OpCode::Continuation,
            masked: false,
            mask_key: [0; 4],
            len: 0,
            payload: Vec::new(),
            frag_opcode: OpCode::Text,
        }
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

    fn take(&mut self, n: usize) -> UResult<Option<Vec<u8>>> {
        while self.leftover.len() < n {
            if !self.fill().map_err(UError::Io)? {
                return Ok(None);
            }
        }
        Ok(Some(self.leftover.drain(..n).collect()))
    }

    /// Decodes one complete frame, blocking on the underlying stream as
    /// needed. Returns `Ok(None)` on a clean EOF between frames.
    pub fn parse(&mut self) -> UResult<Option<Frame>> {
        loop {
            match self.state {
                ParseState::Header => {
                    let hdr = match self.take(2)? {
                        Some(h) => h,
                        None => return Ok(None),
                    };
                    self.fin = hdr[0] & 0x80 != 0;
                    self.opcode = OpCode::from_u8(hdr[0] & 0x0F)?;
                    self.masked = hdr[1] & 0x80 != 0;
                    let len7 = hdr[1] & 0x7F;
                    self.state = match len7 {
                        126 => ParseState::ExtLen16,
                        127 => ParseState::ExtLen64,
                        n => {
                            self.len = n as u64;
                            if self.masked { ParseState::MaskKey } else { ParseState::Payload }
                        }
                    };
                }
                ParseState::ExtLen16 => {
                    let b = match self.take(2)? {
                        Some(b) => b,
                        None => return Err(UError::Protocol(ProtocolError::BadHandshake)),
                    };
                    self.len = u16::from_be_bytes([b[0], b[1]]) as u64;
                    self.state = if self.masked { ParseState::MaskKey } else { ParseState::Payload };
                }
                ParseState::ExtLen64 => {
                    let b = match self.take(8)? {
                        Some(b) => b,
                        None => return Err(UError::Protocol(ProtocolError::BadHandshake)),
                    };
                    self.len = u64::from_be_bytes(b.try_into().unwrap());
                    if self.len > MAX_PAYLOAD {
                        return Err(UError::Protocol(ProtocolError::FrameTooLarge));
                    }
                    self.state = if self.masked { ParseState::MaskKey } else { ParseState::Payload };
                }
                ParseState::MaskKey => {
                    let b = match self.take(4)? {
                        Some(b) => b,
                        None => return Err(UError::Protocol(ProtocolError::BadHandshake)),
                    };
                    self.mask_key = [b[0], b[1], b[2], b[3]];
                    self.state = ParseState::Payload;
                }
                ParseState::Payload => {
                    let len = self.len as usize;
                    let mut data = match self.take(len)? {
                        Some(d) => d,
                        None => return Err(UError::Protocol(ProtocolError::BadHandshake)),
                    };
                    if self.masked {
                        for (i, b) in data.iter_mut().enumerate() {
                            *b ^= self.mask_key[i % 4];
                        }
                    }
                    self.state = ParseState::Header;

                    if self.opcode == OpCode::Continuation {
                        self.payload.append(&mut data);
                        if !self.fin {
                            continue;
                        }
                        let payload = std::mem::take(&mut self.payload);
                        return Ok(Some(Frame { fin: true, opcode: self.frag_opcode, payload, close_code: None }));
                    }

                    if !self.fin && self.opcode != OpCode::Close {
                        self.frag_opcode = self.opcode;
                        self.payload = data;
                        continue;
                    }

                    let close_code = if self.opcode == OpCode::Close && data.len() >= 2 {
                        Some(u16::from_be_bytes([data[0], data[1]]))
                    } else {
                        None
                    };
                    return Ok(Some(Frame { fin: self.fin, opcode: self.opcode, payload: data, close_code }));
                }
            }
        }
    }
}

/// Composes frames with optional client-side masking (spec.md §4.8): a
/// fresh random 4-byte key per frame when `client` is set.
pub struct FrameSerializer {
    client: bool,
}

impl FrameSerializer {
    pub fn new(client: bool) -> FrameSerializer {
        FrameSerializer { client }
    }

    pub fn encode(&self, opcode: OpCode, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 14);
        out.push(0x80 | opcode.to_u8());

        let mask_bit = if self.client { 0x80 } else { 0x00 };
        if data.len() < 126 {
            out.push(mask_bit | data.len() as u8);
        } else if data.len() <= 0xFFFF {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(data.len() as u64).to_be_bytes());
        }

        if self.client {
            let mut key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut key);
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(data);
            for (i, b) in out[start..].iter_mut().enumerate() {
                *b ^= key[i % 4];
            }
        } else {
            out.extend_from_slice(data);
        }
        out
    }

    pub fn encode_close(&self, code: u16) -> Vec<u8> {
        self.encode(OpCode::Close, &code.to_be_bytes())
    }
}

/// A WebSocket connection layered on a [`Stream`], owning its parser and
/// serializer. The handler that accepted the upgrade owns this for the
/// connection's lifetime.
pub struct WSStream<'a, S: TimedIo> {
    inner: &'a Stream<S>,
    parser: FrameParser<'a, S>,
    serializer: FrameSerializer,
}

impl<'a, S: TimedIo> WSStream<'a, S> {
    pub fn new(inner: &'a Stream<S>, client: bool) -> WSStream<'a, S> {
        WSStream { inner, parser: FrameParser::new(inner), serializer: FrameSerializer::new(client) }
    }

    /// Reads one complete (already-defragmented) frame.
    pub fn read(&mut self) -> UResult<Option<Frame>> {
        self.parser.parse()
    }

    pub fn write(&mut self, opcode: OpCode, data: &[u8]) -> UResult<()> {
        let framed = self.serializer.encode(opcode, data);
        if !self.inner.write_sync(&framed) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }

    pub fn write_close(&mut self, code: u16) -> UResult<()> {
        let framed = self.serializer.encode_close(code);
        if !self.inner.write_sync(&framed) {
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "write failed")));
        }
        Ok(())
    }

    pub fn ping(&mut self, data: &[u8]) -> UResult<()> {
        self.write(OpCode::Ping, data)
    }

    pub fn pong(&mut self, data: &[u8]) -> UResult<()> {
        self.write(OpCode::Pong, data)
    }
}

/// Validates the upgrade headers spec.md §4.8 requires and returns the
/// `Sec-WebSocket-Key` value, ready for [`accept_key`].
pub fn verify_handshake_headers(headers: &Headers) -> UResult<String> {
    let upgrade_ok = headers.get("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection_ok = headers.get("connection").is_some_and(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("upgrade")));
    let key = headers.get("sec-websocket-key").filter(|k| !k.is_empty());
    match (upgrade_ok, connection_ok, key) {
        (true, true, Some(key)) => Ok(key.to_string()),
        _ => Err(UError::Protocol(ProtocolError::BadHandshake)),
    }
}

/// `base64(SHA1(key ++ "258EAFA5-E914-47DA-95CA-C5AB0DC85B11"))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Writes the `101 Switching Protocols` response directly (no body framing
/// applies to an upgrade response).
pub fn send_handshake_response<S: TimedIo>(stream: &Stream<S>, version: (u8, u8), key: &str) -> bool {
    let accept = accept_key(key);
    let response = format!(
        "HTTP/{}.{} 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        version.0, version.1, accept
    );
    stream.write_sync(response.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn serializer_masks_client_frames_and_server_does_not() {
        let client = FrameSerializer::new(true);
        let server = FrameSerializer::new(false);
        let c = client.encode(OpCode::Text, b"hi");
        let s = server.encode(OpCode::Text, b"hi");
        assert_eq!(c[1] & 0x80, 0x80);
        assert_eq!(s[1] & 0x80, 0x00);
        assert_eq!(c.len(), 2 + 4 + 2);
        assert_eq!(s.len(), 2 + 2);
    }

    #[test]
    fn verify_handshake_requires_all_three_headers() {
        let mut headers = Headers::new();
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "keep-alive, Upgrade");
        headers.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(verify_handshake_headers(&headers).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");

        let mut missing_key = Headers::new();
        missing_key.append("Upgrade", "websocket");
        missing_key.append("Connection", "upgrade");
        assert!(verify_handshake_headers(&missing_key).is_err());
    }
}
