//! C9 — HTTP server loop (spec.md §4.6).

use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{UError, UResult};
use crate::http::header::Headers;
use crate::http::request::{parse_request, BodyKind, HttpRequest};
use crate::http::response::{send_100_continue, HttpResponseBuilder};
use crate::provider::AsyncProvider;
use crate::socket::{Listener, SocketHandle};
use crate::stream::chunked::ChunkedStream;
use crate::stream::limited::LimitedStream;
use crate::stream::Stream;

/// A handler receives the request context and the path relative to its
/// registered prefix; returns `true` if it handled the request (response
/// sent, or will be before the context drops).
pub type Handler = Arc<dyn Fn(&mut RequestContext, &str) -> bool + Send + Sync>;

pub struct RequestContext {
    pub request: HttpRequest,
    stream: Arc<Stream<SocketHandle>>,
    responded: bool,
    errored: bool,
    sent_100: Cell<bool>,
    keep_alive: bool,
}

impl RequestContext {
    fn new(request: HttpRequest, stream: Arc<Stream<SocketHandle>>) -> RequestContext {
        let keep_alive = request.keep_alive_requested();
        RequestContext {
            request,
            stream,
            responded: false,
            errored: false,
            sent_100: Cell::new(false),
            keep_alive,
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn uri(&self) -> &str {
        &self.request.target
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.request.headers
    }

    /// Reads the whole body into memory, emitting the `100 Continue`
    /// interim response first if the client asked for one (exactly once
    /// per request, spec.md §8 boundary case).
    pub fn read_body(&mut self) -> UResult<Vec<u8>> {
        if !self.sent_100.get() {
            if self.request.wants_100_continue() {
                send_100_continue(&self.stream, self.request.version);
            }
            self.sent_100.set(true);
        }
        let result = (|| match self.request.body {
            BodyKind::Empty => Ok(Vec::new()),
            BodyKind::Length(n) => {
                let mut limited = LimitedStream::new(&self.stream, n, 0);
                let mut out = Vec::new();
                loop {
                    let chunk = limited.read().map_err(UError::Io)?;
                    if chunk.is_empty() {
                        break;
                    }
                    out.extend(chunk);
                }
                Ok(out)
            }
            BodyKind::Chunked => {
                let mut chunked = ChunkedStream::new(&self.stream);
                let mut out = Vec::new();
                loop {
                    let chunk = chunked.read()?;
                    if chunk.is_empty() && chunked.input_closed() {
                        break;
                    }
                    out.extend(chunk);
                }
                Ok(out)
            }
        })();
        if result.is_err() {
            self.errored = true;
        }
        result
    }

    pub fn respond(&self) -> HttpResponseBuilder {
        HttpResponseBuilder::new(self.request.version)
    }

    pub fn send(&mut self, mut builder: HttpResponseBuilder, body: &[u8]) -> UResult<()> {
        if !self.keep_alive {
            builder.set("Connection", "close");
        }
        let mut resp_body = builder.send(&self.stream, &self.request.method, self.keep_alive)?;
        resp_body.write(body)?;
        resp_body.finish()?;
        self.responded = true;
        Ok(())
    }

    pub fn keep_alive_effective(&self) -> bool {
        self.keep_alive && !self.errored
    }

    /// Verifies the WebSocket upgrade headers, sends the `101` response,
    /// and hands back the shared stream for the caller to wrap in a
    /// [`crate::ws::WSStream`]. The connection is no longer treated as a
    /// keep-alive HTTP connection afterward — the handler owns the socket
    /// for the rest of its lifetime.
    pub fn upgrade_websocket(&mut self) -> UResult<Arc<Stream<SocketHandle>>> {
        let key = crate::ws::verify_handshake_headers(&self.request.headers)?;
        if !crate::ws::send_handshake_response(&self.stream, self.request.version, &key) {
            self.errored = true;
            return Err(UError::Io(io::Error::new(io::ErrorKind::Other, "failed to send websocket handshake response")));
        }
        self.responded = true;
        self.keep_alive = false;
        Ok(self.stream.clone())
    }

    fn mark_responded(&mut self) {
        self.responded = true;
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.responded {
            return;
        }
        let status = if self.errored { (400, "Bad Request") } else { (204, "No Content") };
        let mut builder = HttpResponseBuilder::new(self.request.version);
        builder.status(status.0, status.1);
        builder.set("Connection", "close");
        self.keep_alive = false;
        if let Ok(mut body) = builder.send(&self.stream, &self.request.method, false) {
            let _ = body.finish();
        }
    }
}

/// Two-level host → path-prefix handler registry (spec.md §4.6).
pub struct Router {
    hosts: RwLock<HashMap<String, Vec<(String, Handler)>>>,
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}

impl Router {
    pub fn new() -> Router {
        Router { hosts: RwLock::new(HashMap::new()) }
    }

    /// Registers `handler` for requests whose Host header matches `host`
    /// (`"*"` matches any host not otherwise registered) and whose path
    /// starts with `path_prefix`.
    pub fn register(&self, host: &str, path_prefix: &str, handler: Handler) {
        let mut hosts = self.hosts.write().unwrap();
        hosts.entry(host.to_string()).or_default().push((path_prefix.to_string(), handler));
    }

    /// Learns the per-host path prefix by probing registered handlers
    /// trimmed from the right (longest-prefix match), then runs it.
    pub fn dispatch(&self, ctx: &mut RequestContext) -> bool {
        let host = ctx
            .header("host")
            .unwrap_or("")
            .split(':')
            .next()
            .unwrap_or("")
            .to_string();
        let path = ctx.request.target.split('?').next().unwrap_or("/").to_string();

        let hosts = self.hosts.read().unwrap();
        let bucket = hosts.get(host.as_str()).or_else(|| hosts.get("*"));
        let Some(handlers) = bucket else { return false };

        let mut candidates: Vec<(String, Handler)> = handlers
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .cloned()
            .collect();
        candidates.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));
        drop(hosts);

        for (prefix, handler) in candidates {
            let rel = &path[prefix.len()..];
            if handler(ctx, rel) {
                ctx.mark_responded();
                return true;
            }
        }
        false
    }
}

/// Listener pool + router + provider, running blocking accept loops on
/// dedicated threads and handing each connection's request loop to the
/// provider's action queue.
pub struct HttpServer {
    listeners: Vec<Listener>,
    provider: AsyncProvider,
    router: Arc<Router>,
    max_header_bytes: Option<usize>,
}

impl HttpServer {
    pub fn bind(spec: &str, provider: AsyncProvider, router: Arc<Router>) -> UResult<HttpServer> {
        let endpoints = crate::addr::resolve_listen_spec(spec)?;
        let listeners = endpoints
            .iter()
            .map(Listener::bind)
            .collect::<io::Result<Vec<_>>>()
            .map_err(UError::Io)?;
        Ok(HttpServer { listeners, provider, router, max_header_bytes: None })
    }

    pub fn with_max_header_bytes(mut self, n: usize) -> HttpServer {
        self.max_header_bytes = Some(n);
        self
    }

    /// The bound address of listener `idx` (mainly for tests binding to
    /// port `0`).
    pub fn local_addr(&self, idx: usize) -> io::Result<crate::socket::PeerAddr> {
        self.listeners[idx].local_addr()
    }

    /// Spawns one accept-loop thread per bound listener. Returns
    /// immediately; call `provider.stop()` to unwind.
    pub fn run(self: Arc<Self>) -> Vec<std::thread::JoinHandle<()>> {
        (0..self.listeners.len())
            .map(|idx| {
                let this = self.clone();
                std::thread::Builder::new()
                    .name(format!("nanoserve-accept-{idx}"))
                    .spawn(move || this.accept_loop(idx))
                    .expect("failed to spawn accept thread")
            })
            .collect()
    }

    fn accept_loop(&self, idx: usize) {
        let listener = &self.listeners[idx];
        loop {
            if self.provider.is_stopped() {
                return;
            }
            match listener.accept() {
                Ok((sock, peer)) => {
                    debug!("accepted connection from {peer:?}");
                    self.spawn_connection(sock);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let mut pfd = crate::sys::poll::pollfd(listener.as_raw_fd(), libc::POLLIN);
                    let _ = crate::sys::poll::poll(std::slice::from_mut(&mut pfd), Some(Duration::from_millis(500)));
                }
                Err(e) => {
                    warn!("accept failed on listener {idx}: {e}");
                    return;
                }
            }
        }
    }

    fn spawn_connection(&self, sock: SocketHandle) {
        let provider = self.provider.clone();
        let router = self.router.clone();
        let max_header_bytes = self.max_header_bytes;
        self.provider.post(Box::new(move || {
            let stream = Stream::new(sock, provider);
            loop {
                match parse_request(&stream, max_header_bytes) {
                    Ok(Some(req)) => {
                        let method = req.method.clone();
                        let version = req.version;
                        let mut ctx = RequestContext::new(req, stream.clone());
                        let keep_alive = ctx.keep_alive;
                        if !router.dispatch(&mut ctx) {
                            let mut builder = HttpResponseBuilder::new(version);
                            builder.status(404, "Not Found");
                            if let Ok(mut body) = builder.send(&stream, &method, keep_alive) {
                                let _ = body.write(b"not found");
                                let _ = body.finish();
                            }
                            ctx.mark_responded();
                        }
                        let keep = ctx.keep_alive_effective();
                        drop(ctx);
                        if !keep {
                            let _ = stream.close_output();
                            let _ = stream.close_input();
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        debug!("request parse failed: {e}");
                        if let Some((code, reason)) = e.protocol_status() {
                            let mut builder = HttpResponseBuilder::new((1, 1));
                            builder.status(code, reason);
                            builder.set("Connection", "close");
                            if let Ok(mut body) = builder.send(&stream, "GET", false) {
                                let _ = body.write(reason.as_bytes());
                                let _ = body.finish();
                            }
                        }
                        let _ = stream.close_output();
                        let _ = stream.close_input();
                        return;
                    }
                }
            }
        }));
    }
}
