//! HTTP/1.1 protocol engine (C8, C9, C10): request/response parsing,
//! the server loop and its routing table, and a client for the other
//! direction.

pub mod client;
pub mod header;
pub mod request;
pub mod response;
pub mod server;

pub use client::{ClientBodyKind, HttpClientRequest, HttpResponse};
pub use header::{HeaderName, Headers};
pub use request::{BodyKind, HttpRequest};
pub use response::{HttpResponseBuilder, ResponseBody};
pub use server::{Handler, HttpServer, RequestContext, Router};
