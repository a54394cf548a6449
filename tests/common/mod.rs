//! Shared helpers for the integration tests: spin up a real `HttpServer`
//! on an OS-assigned loopback port and give back its port plus the
//! `AsyncProvider` driving it.

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use nanoserve::http::server::{HttpServer, Router};
use nanoserve::provider::{run_worker_threads, AsyncProvider, AsyncProviderConfig};
use nanoserve::socket::PeerAddr;

#[allow(dead_code)]
pub fn start_server(router: Router) -> (Arc<HttpServer>, AsyncProvider, u16) {
    let provider = AsyncProvider::new(AsyncProviderConfig { epoll_dispatchers: 1, poll_dispatchers: 0, scheduler: true, threads: 2 })
        .expect("provider");
    let server = Arc::new(HttpServer::bind("127.0.0.1:0", provider.clone(), Arc::new(router)).expect("bind"));
    let port = match server.local_addr(0).expect("local addr") {
        PeerAddr::Tcp(a) => a.port(),
        PeerAddr::Unix(_) => unreachable!(),
    };
    let _workers = run_worker_threads(&provider, 2);
    let _accept_threads = server.clone().run();
    (server, provider, port)
}

#[allow(dead_code)]
pub fn connect(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", port)) {
            s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            return s;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("could not connect to test server");
}

/// Reads one HTTP/1.1 response (status line + headers + length-delimited
/// body) off `stream`, returning `(status, body)`.
#[allow(dead_code)]
pub fn read_response(stream: &mut TcpStream) -> (u16, Vec<u8>) {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    let header_end = loop {
        stream.read_exact(&mut byte).unwrap();
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break buf.len();
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let status: u16 = head.lines().next().unwrap().split_whitespace().nth(1).unwrap().parse().unwrap();
    let content_length: usize = head
        .lines()
        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse().unwrap()))
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        stream.read_exact(&mut body).unwrap();
    }
    (status, body)
}
