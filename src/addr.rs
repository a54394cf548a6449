//! C1 — Address Resolver (spec.md §4, §6 "Listen specifier").

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::path::PathBuf;

use crate::error::{UError, UResult};

/// A tagged address: IPv4, IPv6, or a Unix-domain path, with an optional
/// filesystem permission mask for the latter (spec.md §3 "Endpoint").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Unix(PathBuf, Option<u32>),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::V4(a) => write!(f, "{a}"),
            Endpoint::V6(a) => write!(f, "[{}]:{}", a.ip(), a.port()),
            Endpoint::Unix(p, _) => write!(f, "unix:{}", p.display()),
        }
    }
}

/// Resolve one or more space-separated listen specifiers (spec.md §6) into a
/// combined endpoint list.
///
/// Grammar per specifier:
/// - `host:port` — IPv4 or hostname
/// - `[ipv6]:port` — IPv6 literal
/// - `:port` — wildcard bind (resolved as `0.0.0.0:port` and `[::]:port`)
/// - `unix:/path[:perm]` — `perm` is octal (`0644`) or `ugo` letters setting
///   read/write for user/group/other
pub fn resolve_listen_spec(spec: &str) -> UResult<Vec<Endpoint>> {
    let mut out = Vec::new();
    for token in spec.split_whitespace() {
        out.extend(resolve_one(token)?);
    }
    Ok(out)
}

fn resolve_one(token: &str) -> UResult<Vec<Endpoint>> {
    if let Some(rest) = token.strip_prefix("unix:") {
        return Ok(vec![parse_unix(rest)?]);
    }

    if let Some(rest) = token.strip_prefix(':') {
        let port: u16 = rest.parse().map_err(|_| UError::Resolve {
            spec: token.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad port"),
        })?;
        return Ok(vec![
            Endpoint::V4(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port)),
            Endpoint::V6(SocketAddrV6::new(std::net::Ipv6Addr::UNSPECIFIED, port, 0, 0)),
        ]);
    }

    let addrs = token.to_socket_addrs().map_err(|source| UError::Resolve {
        spec: token.to_string(),
        source,
    })?;

    let endpoints: Vec<Endpoint> = addrs
        .map(|a| match a {
            SocketAddr::V4(a) => Endpoint::V4(a),
            SocketAddr::V6(a) => Endpoint::V6(a),
        })
        .collect();

    if endpoints.is_empty() {
        return Err(UError::Resolve {
            spec: token.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
        });
    }

    Ok(endpoints)
}

fn parse_unix(rest: &str) -> UResult<Endpoint> {
    // rest is "/path" or "/path:perm"
    let (path, perm) = match rest.rsplit_once(':') {
        Some((path, perm_str)) if looks_like_perm(perm_str) => {
            (path, Some(parse_perm(perm_str)?))
        }
        _ => (rest, None),
    };
    Ok(Endpoint::Unix(PathBuf::from(path), perm))
}

fn looks_like_perm(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || "ugo".contains(c))
}

fn parse_perm(s: &str) -> UResult<u32> {
    if s.chars().all(|c| c.is_ascii_digit()) {
        return u32::from_str_radix(s, 8).map_err(|_| UError::Resolve {
            spec: s.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad octal perm"),
        });
    }
    // letters: any of 'u', 'g', 'o' present grants rw for that class
    let mut mode = 0o000;
    if s.contains('u') {
        mode |= 0o600;
    }
    if s.contains('g') {
        mode |= 0o060;
    }
    if s.contains('o') {
        mode |= 0o006;
    }
    Ok(mode)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcard_port() {
        let eps = resolve_listen_spec(":8080").unwrap();
        assert_eq!(eps.len(), 2);
    }

    #[test]
    fn unix_with_octal_perm() {
        let eps = resolve_listen_spec("unix:/tmp/foo.sock:0660").unwrap();
        assert_eq!(eps, vec![Endpoint::Unix(PathBuf::from("/tmp/foo.sock"), Some(0o660))]);
    }

    #[test]
    fn unix_with_letter_perm() {
        let eps = resolve_listen_spec("unix:/tmp/foo.sock:ug").unwrap();
        assert_eq!(eps, vec![Endpoint::Unix(PathBuf::from("/tmp/foo.sock"), Some(0o660))]);
    }

    #[test]
    fn unix_without_perm() {
        let eps = resolve_listen_spec("unix:/tmp/bar.sock").unwrap();
        assert_eq!(eps, vec![Endpoint::Unix(PathBuf::from("/tmp/bar.sock"), None)]);
    }

    #[test]
    fn multiple_specifiers() {
        let eps = resolve_listen_spec("127.0.0.1:9000 unix:/tmp/x.sock").unwrap();
        assert_eq!(eps.len(), 2);
    }
}
