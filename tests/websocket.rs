//! S5: a client opens a WebSocket, sends a masked text frame, the server
//! decodes and echoes it unmasked, and a close frame terminates cleanly.

mod common;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use nanoserve::addr::Endpoint;
use nanoserve::http::header::HeaderEndDetector;
use nanoserve::http::server::Router;
use nanoserve::socket::SocketHandle;
use nanoserve::stream::Stream;
use nanoserve::ws::{self, FrameParser, FrameSerializer, OpCode, CLOSE_NORMAL};

#[test]
fn s5_masked_text_frame_round_trips_and_close_is_clean() {
    let router = Router::new();
    router.register(
        "*",
        "/ws",
        Arc::new(|ctx, _rel| {
            let stream = match ctx.upgrade_websocket() {
                Ok(s) => s,
                Err(_) => return false,
            };
            let mut ws = ws::WSStream::new(&stream, false);
            loop {
                match ws.read() {
                    Ok(Some(frame)) => match frame.opcode {
                        OpCode::Text | OpCode::Binary => {
                            if ws.write(frame.opcode, &frame.payload).is_err() {
                                break;
                            }
                        }
                        OpCode::Close => {
                            let code = frame.close_code.unwrap_or(CLOSE_NORMAL);
                            let _ = ws.write_close(code);
                            break;
                        }
                        OpCode::Ping => {
                            let _ = ws.pong(&frame.payload);
                        }
                        _ => {}
                    },
                    _ => break,
                }
            }
            true
        }),
    );
    let (_server, provider, port) = common::start_server(router);

    let endpoint = Endpoint::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let handle = SocketHandle::connect(&endpoint).expect("connect");
    let stream = Stream::new(handle, provider);

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let request = format!(
        "GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\n\r\n"
    );
    assert!(stream.write_sync(request.as_bytes()));

    let mut buf = Vec::new();
    let mut detector = HeaderEndDetector::new();
    let end = loop {
        let view = stream.read_sync().unwrap();
        assert!(!view.is_empty(), "eof before handshake completed");
        let start = buf.len();
        buf.extend_from_slice(&view);
        drop(view);
        if let Some(e) = detector.feed(&buf[start..]) {
            break start + e;
        }
    };
    let leftover = buf[end..].to_vec();
    buf.truncate(end);
    if !leftover.is_empty() {
        stream.put_back(leftover);
    }
    let head = String::from_utf8_lossy(&buf);
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected handshake response: {head}");
    assert!(head.contains(&ws::accept_key(key)));

    let serializer = FrameSerializer::new(true);
    let mut parser = FrameParser::new(&stream);

    assert!(stream.write_sync(&serializer.encode(OpCode::Text, b"hi")));
    let echoed = parser.parse().unwrap().expect("echoed frame");
    assert_eq!(echoed.opcode, OpCode::Text);
    assert_eq!(echoed.payload, b"hi");

    assert!(stream.write_sync(&serializer.encode_close(CLOSE_NORMAL)));
    let close_frame = parser.parse().unwrap().expect("close frame");
    assert_eq!(close_frame.opcode, OpCode::Close);
    assert_eq!(close_frame.close_code, Some(CLOSE_NORMAL));
}
