//! HTTP transport layer.
//!
//! The session performs every exchange through the [`Transport`] trait: one
//! POST in, one status + body + `Set-Cookie` list out. Cookies are kept in a
//! [`CookieJar`] shared by all requests of a session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session        │        HTTP POST             │  Bayeux         │
//! │                 │  [envelope] ───────────────► │  endpoint       │
//! │  frame_request  │  ◄─────────────── [envelope] │                 │
//! │  CookieJar      │        Set-Cookie            │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cookie` | Cookie jar keyed by request URL |
//! | `http` | `reqwest`-backed transport (feature `reqwest`) |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Cookie jar keyed by request URL.
pub mod cookie;

/// `reqwest`-backed HTTP transport.
#[cfg(feature = "reqwest")]
pub mod http;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use cookie::CookieJar;
#[cfg(feature = "reqwest")]
pub use http::HttpTransport;

// ============================================================================
// Constants
// ============================================================================

/// Content type of Bayeux frames.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Content type of the login form.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// TransportRequest / TransportResponse
// ============================================================================

/// A single outbound HTTP POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Target URL, including any query string.
    pub url: Url,
    /// Request body.
    pub body: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    /// Creates a request with no headers.
    #[inline]
    #[must_use]
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The reply to a [`TransportRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Raw `Set-Cookie` header values.
    pub set_cookies: Vec<String>,
}

impl TransportResponse {
    /// Creates a response with no cookies.
    #[inline]
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookies: Vec::new(),
        }
    }

    /// Returns `true` for a 2xx status.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// ProxyConfig
// ============================================================================

/// HTTP proxy used for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl ProxyConfig {
    /// Creates a proxy configuration.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the proxy URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Performs one HTTP exchange.
///
/// Implementations must allow concurrent calls: the long-poll loop keeps a
/// request open while the foreground submits queries.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and returns the remote's reply.
    ///
    /// # Errors
    ///
    /// Returns an error only when no HTTP response was obtained; a non-success
    /// status is a successful exchange.
    async fn send_request(&self, request: TransportRequest) -> Result<TransportResponse>;
}
