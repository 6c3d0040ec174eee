//! Tunnel endpoint addresses.
//!
//! A tunnel is addressed by a WebSocket URL:
//!
//! ```text
//! ws://host[:port]/path     default port 80
//! wss://host[:port]/path    default port 443
//! ```

use std::fmt;

use thiserror::Error;
use url::{Host, Url};

/// Errors produced while parsing a tunnel URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    /// The string is not a URL at all.
    #[error("malformed tunnel URL '{url}': {reason}")]
    Malformed { url: String, reason: String },

    /// The scheme is something other than `ws` or `wss`.
    #[error("unsupported tunnel scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The URL has no host component.
    #[error("tunnel URL '{0}' has no host")]
    MissingHost(String),
}

/// Transport security of the tunnel socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain WebSocket over TCP.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl Scheme {
    /// Port used when the URL does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    /// Returns `true` for `wss`.
    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Wss)
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

/// A parsed tunnel endpoint: scheme, host, port, and request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelUrl {
    scheme: Scheme,
    host: String,
    port: u16,
    /// Path plus query string, always starting with `/`.
    target: String,
}

impl TunnelUrl {
    /// Parses `scheme://host[:port]/path[?query]`.
    ///
    /// # Errors
    ///
    /// Returns [`UrlError`] for unparseable input, a scheme other than
    /// `ws`/`wss`, or a missing host.
    ///
    /// # Example
    ///
    /// ```rust
    /// use xray_core::TunnelUrl;
    ///
    /// let url = TunnelUrl::parse("wss://xray.example.com/devices/42").unwrap();
    /// assert_eq!(url.port(), 443);
    /// assert_eq!(url.serial(), "xray.example.com:443");
    /// ```
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let parsed = Url::parse(input).map_err(|e| UrlError::Malformed {
            url: input.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match parsed.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(UrlError::UnsupportedScheme(other.to_string())),
        };

        // Keep IPv6 literals unbracketed; `Display` adds the brackets back.
        let host = match parsed.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(UrlError::MissingHost(input.to_string())),
        };

        // `Url::port` returns `None` when the port equals the scheme default,
        // so the explicit fallback covers both "absent" and "default".
        let port = parsed.port().unwrap_or_else(|| scheme.default_port());

        let mut target = parsed.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            target,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path (and query, if any) of the upgrade request.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// `"<host>:<port>"`, the identifier a handle reports as its serial number.
    pub fn serial(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for TunnelUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals need their brackets back.
        if self.host.contains(':') {
            write!(
                f,
                "{}://[{}]:{}{}",
                self.scheme.as_str(),
                self.host,
                self.port,
                self.target
            )
        } else {
            write!(
                f,
                "{}://{}:{}{}",
                self.scheme.as_str(),
                self.host,
                self.port,
                self.target
            )
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_without_port_defaults_to_80() {
        // Arrange / Act
        let url = TunnelUrl::parse("ws://device-host/xray/abc").unwrap();

        // Assert
        assert_eq!(url.scheme(), Scheme::Ws);
        assert_eq!(url.host(), "device-host");
        assert_eq!(url.port(), 80);
        assert_eq!(url.target(), "/xray/abc");
    }

    #[test]
    fn test_wss_without_port_defaults_to_443() {
        let url = TunnelUrl::parse("wss://device-host/xray").unwrap();
        assert_eq!(url.port(), 443);
        assert!(url.scheme().is_secure());
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let url = TunnelUrl::parse("ws://127.0.0.1:9000/t").unwrap();
        assert_eq!(url.port(), 9000);
        assert_eq!(url.serial(), "127.0.0.1:9000");
    }

    #[test]
    fn test_explicit_default_port_is_reported() {
        // `url` normalises ":443" away for wss; the serial must still show it.
        let url = TunnelUrl::parse("wss://h:443/t").unwrap();
        assert_eq!(url.serial(), "h:443");
    }

    #[test]
    fn test_missing_path_becomes_root() {
        let url = TunnelUrl::parse("ws://h:81").unwrap();
        assert_eq!(url.target(), "/");
    }

    #[test]
    fn test_query_is_preserved_in_target() {
        let url = TunnelUrl::parse("ws://h/t?device=42").unwrap();
        assert_eq!(url.target(), "/t?device=42");
    }

    #[test]
    fn test_http_scheme_is_rejected() {
        let result = TunnelUrl::parse("http://h/t");
        assert_eq!(result, Err(UrlError::UnsupportedScheme("http".to_string())));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = TunnelUrl::parse("not a url");
        assert!(matches!(result, Err(UrlError::Malformed { .. })));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let url = TunnelUrl::parse("ws://h:8080/a/b?c=d").unwrap();
        let again = TunnelUrl::parse(&url.to_string()).unwrap();
        assert_eq!(url, again);
    }

    #[test]
    fn test_display_brackets_ipv6_host() {
        let url = TunnelUrl::parse("ws://[::1]:9000/t").unwrap();
        assert_eq!(url.to_string(), "ws://[::1]:9000/t");
    }
}
