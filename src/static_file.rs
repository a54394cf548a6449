//! A6 — static file responder, grounded on
//! `original_source/http_server.cpp`'s `HttpServerRequest::sendFile`: an
//! ETag derived from mtime, `If-None-Match` → 304, and an extension →
//! Content-Type table.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::UResult;
use crate::http::server::RequestContext;

const MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpe", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("ico", "image/vnd.microsoft.icon"),
    ("svg", "image/svg+xml"),
    ("zip", "application/zip"),
    ("pdf", "application/pdf"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("wasm", "application/wasm"),
];

fn content_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|ext| MIME_TYPES.iter().find(|(e, _)| e.eq_ignore_ascii_case(ext)))
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

fn etag_for(meta: &fs::Metadata) -> io::Result<String> {
    let mtime = meta.modified()?;
    let nanos = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    Ok(format!("\"{nanos:x}\""))
}

fn if_none_match_hit(header: Option<&str>, etag: &str) -> bool {
    match header {
        Some(v) => v.split(',').map(str::trim).any(|tag| tag == etag),
        None => false,
    }
}

/// Serves `path` as the response body for `ctx`. Returns `Ok(false)` (the
/// caller should fall through to its own 404 handling) if `path` doesn't
/// exist or isn't a regular file; `Ok(true)` once a response has been sent.
pub fn send_file(ctx: &mut RequestContext, path: &Path) -> UResult<bool> {
    let meta = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => return Ok(false),
    };
    let etag = etag_for(&meta)?;

    if if_none_match_hit(ctx.header("if-none-match"), &etag) {
        let mut builder = ctx.respond();
        builder.status(304, "Not Modified");
        builder.set("ETag", &etag);
        ctx.send(builder, b"")?;
        return Ok(true);
    }

    let body = fs::read(path)?;
    if body.is_empty() {
        let mut builder = ctx.respond();
        builder.status(204, "No Content");
        ctx.send(builder, b"")?;
        return Ok(true);
    }

    let mut builder = ctx.respond();
    builder.status(200, "OK");
    builder.set("ETag", &etag);
    builder.set("Content-Type", content_type_for(path));
    builder.set("Content-Length", &body.len().to_string());
    ctx.send(builder, &body)?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn picks_extension_mime_type() {
        assert_eq!(content_type_for(Path::new("/x/y/app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("/x/y/readme")), "application/octet-stream");
    }

    #[test]
    fn if_none_match_accepts_any_listed_tag() {
        assert!(if_none_match_hit(Some("\"a\", \"b\""), "\"b\""));
        assert!(!if_none_match_hit(Some("\"a\""), "\"b\""));
        assert!(!if_none_match_hit(None, "\"b\""));
    }
}
