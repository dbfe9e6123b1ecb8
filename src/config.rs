//! Server configuration and URL parsing.
//!
//! Only a single standalone server is addressed per engine:
//! `redis://host[:port]`, with `[::1]:port` accepted for IPv6 literals.

use std::time::Duration;

use crate::error::{RedustError, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default maximum read buffer size per connection (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// Where to connect and what to open eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Number of exclusive (blocking) connections opened at construction.
    pub blocked_prewarm: usize,
    /// Open the write-only connection at construction.
    pub write_only_prewarm: bool,
    /// Open the shared read-write connection at construction.
    pub read_write_prewarm: bool,
    /// Maximum read buffer size per connection in bytes.
    pub max_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            blocked_prewarm: 0,
            write_only_prewarm: false,
            read_write_prewarm: false,
            max_buffer_size: DEFAULT_MAX_BUF_SIZE,
        }
    }
}

impl ServerConfig {
    /// Config for `host:port` with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse `redis://host[:port]`.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| RedustError::Argument(format!("invalid URL, missing ://: {url}")))?;
        if scheme != "redis" {
            return Err(RedustError::Argument(format!(
                "unsupported URL scheme: {scheme}"
            )));
        }

        let host_port = rest.strip_suffix('/').unwrap_or(rest);
        if host_port.contains('/') || host_port.contains('@') {
            return Err(RedustError::Argument(format!(
                "only redis://host[:port] is supported: {url}"
            )));
        }

        let mut config = Self::default();
        parse_host_port(host_port, &mut config.host, &mut config.port)?;
        Ok(config)
    }

    /// Return the address as "host:port".
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parse `host[:port]` or `[ipv6]:port`.
fn parse_host_port(s: &str, host: &mut String, port: &mut u16) -> Result<()> {
    if s.starts_with('[') {
        let close = s
            .find(']')
            .ok_or_else(|| RedustError::Argument(format!("unclosed IPv6 bracket: {s}")))?;
        *host = s[1..close].to_string();
        let after = &s[close + 1..];
        *port = match after.strip_prefix(':') {
            Some(port_str) => port_str
                .parse()
                .map_err(|_| RedustError::Argument(format!("invalid port: {port_str}")))?,
            None => DEFAULT_PORT,
        };
    } else if let Some((h, p)) = s.rsplit_once(':') {
        *host = h.to_string();
        *port = p
            .parse()
            .map_err(|_| RedustError::Argument(format!("invalid port: {p}")))?;
    } else {
        *host = s.to_string();
        *port = DEFAULT_PORT;
    }

    if host.is_empty() {
        *host = "127.0.0.1".to_string();
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────
