//! A micro web-server and networking toolkit built on a raw epoll/poll
//! async I/O core.
//!
//! The core is a small callback-based runtime (no `async`/`await`): a pool
//! of dispatchers service registered [`resource::AsyncResource`]s, a pool of
//! worker threads drains them plus an immediate-action queue
//! ([`provider::AsyncProvider`]). [`stream::Stream`] sits on top of a socket
//! and provides buffered, timeout-aware sync and async reads/writes; the
//! `http` module builds an HTTP/1.1 request/response engine, server and
//! client on top of that, and [`ws`] upgrades a connection to a WebSocket.
//!
//! ```no_run
//! use nanoserve::addr::resolve_listen_spec;
//!
//! let endpoints = resolve_listen_spec(":8080").unwrap();
//! assert_eq!(endpoints.len(), 2);
//! ```

pub mod addr;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod openapi;
pub mod provider;
pub mod query;
pub mod queue;
pub mod ready;
pub mod resource;
pub mod signal;
pub mod socket;
pub mod static_file;
pub mod stream;
pub mod sys;
pub mod token;
pub mod udp;
pub mod waker;
pub mod ws;

#[cfg(feature = "tls")]
pub mod tls;

pub use addr::Endpoint;
pub use error::{ProtocolError, UError, UResult};
pub use provider::{AsyncProvider, AsyncProviderConfig};
pub use resource::AsyncResource;
pub use socket::SocketHandle;
pub use stream::Stream;
