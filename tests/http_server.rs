//! S1-S3: end-to-end HTTP/1.1 server behavior over a real TCP loopback
//! connection — keep-alive across two requests, chunked request bodies,
//! and the 100-continue ordering guarantee.

mod common;

use std::io::{Read, Write};
use std::sync::Arc;

use nanoserve::http::server::Router;

#[test]
fn s1_keep_alive_across_two_requests() {
    let router = Router::new();
    router.register(
        "*",
        "/hello",
        Arc::new(|ctx, _rel| {
            let body = b"world";
            let mut builder = ctx.respond();
            builder.status(200, "OK");
            builder.set("Content-Length", &body.len().to_string());
            ctx.send(builder, body).is_ok()
        }),
    );
    let (_server, _provider, port) = common::start_server(router);
    let mut stream = common::connect(port);

    for _ in 0..2 {
        stream.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let (status, body) = common::read_response(&mut stream);
        assert_eq!(status, 200);
        assert_eq!(&body, b"world");
    }
}

#[test]
fn s2_chunked_request_body_is_reassembled() {
    let router = Router::new();
    router.register(
        "*",
        "/echo",
        Arc::new(|ctx, _rel| {
            let body = match ctx.read_body() {
                Ok(b) => b,
                Err(_) => return false,
            };
            let mut builder = ctx.respond();
            builder.status(200, "OK");
            builder.set("Content-Length", &body.len().to_string());
            ctx.send(builder, &body).is_ok()
        }),
    );
    let (_server, _provider, port) = common::start_server(router);
    let mut stream = common::connect(port);

    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
        .unwrap();
    let (status, body) = common::read_response(&mut stream);
    assert_eq!(status, 200);
    assert_eq!(&body, b"hello world");
}

#[test]
fn s3_100_continue_precedes_body_bytes() {
    let router = Router::new();
    router.register(
        "*",
        "/ping",
        Arc::new(|ctx, _rel| {
            let body = match ctx.read_body() {
                Ok(b) => b,
                Err(_) => return false,
            };
            let mut builder = ctx.respond();
            builder.status(200, "OK");
            builder.set("Content-Length", &body.len().to_string());
            ctx.send(builder, &body).is_ok()
        }),
    );
    let (_server, _provider, port) = common::start_server(router);
    let mut stream = common::connect(port);

    stream
        .write_all(b"POST /ping HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut interim = [0u8; 25];
    stream.read_exact(&mut interim).unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"ping").unwrap();
    let (status, body) = common::read_response(&mut stream);
    assert_eq!(status, 200);
    assert_eq!(&body, b"ping");
}

#[test]
fn transfer_encoding_without_chunked_is_rejected_with_411() {
    let router = Router::new();
    let (_server, _provider, port) = common::start_server(router);
    let mut stream = common::connect(port);

    stream
        .write_all(b"POST /anything HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _) = common::read_response(&mut stream);
    assert_eq!(status, 411);
}

#[test]
fn unsupported_expect_value_is_rejected_with_417_without_reaching_a_handler() {
    let router = Router::new();
    router.register(
        "*",
        "/ping",
        Arc::new(|ctx, _rel| {
            let body = match ctx.read_body() {
                Ok(b) => b,
                Err(_) => return false,
            };
            let mut builder = ctx.respond();
            builder.status(200, "OK");
            builder.set("Content-Length", &body.len().to_string());
            ctx.send(builder, &body).is_ok()
        }),
    );
    let (_server, _provider, port) = common::start_server(router);
    let mut stream = common::connect(port);

    stream
        .write_all(b"POST /ping HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nExpect: gzip\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (status, _) = common::read_response(&mut stream);
    assert_eq!(status, 417);
}
