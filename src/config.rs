//! A3 — filesystem-level configuration (spec.md §1's "configuration"
//! collaborator), loaded via `serde` + `toml`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{UError, UResult};

/// Top-level configuration file, e.g.:
///
/// ```toml
/// [server]
/// listen = ":8080 unix:/run/nanoserve.sock:0660"
/// threads = 4
/// max_header_bytes = 65536
///
/// [tls]
/// cert = "/etc/nanoserve/cert.pem"
/// key = "/etc/nanoserve/key.pem"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Space-separated listen specifiers, per `addr::resolve_listen_spec`.
    pub listen: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub max_header_bytes: Option<usize>,
    #[serde(default)]
    pub epoll_dispatchers: Option<usize>,
    #[serde(default)]
    pub poll_dispatchers: Option<usize>,
}

fn default_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

impl Config {
    pub fn load(path: &Path) -> UResult<Config> {
        let text = std::fs::read_to_string(path).map_err(UError::Io)?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> UResult<Config> {
        toml::from_str(text).map_err(|e| UError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    pub fn provider_config(&self) -> crate::provider::AsyncProviderConfig {
        crate::provider::AsyncProviderConfig {
            epoll_dispatchers: self.server.epoll_dispatchers.unwrap_or(1),
            poll_dispatchers: self.server.poll_dispatchers.unwrap_or(0),
            scheduler: true,
            threads: self.server.threads,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = Config::parse(
            r#"
            [server]
            listen = ":8080"
            threads = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.listen, ":8080");
        assert_eq!(cfg.server.threads, 2);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn rejects_missing_required_field() {
        assert!(Config::parse("[server]\nthreads = 2\n").is_err());
    }
}
