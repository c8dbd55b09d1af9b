//! `reqwest`-backed HTTP transport.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use tracing::trace;

use crate::error::{Error, Result};

use super::{ProxyConfig, Transport, TransportRequest, TransportResponse};

// ============================================================================
// HttpTransport
// ============================================================================

/// A [`reqwest`]-backed implementation of [`Transport`].
///
/// Cookies are handled by the session's own jar, so the client's cookie
/// store stays disabled.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        Self::with_options(None, None)
    }

    /// Creates a transport with an optional proxy and request timeout.
    ///
    /// The timeout must exceed the long-poll advice or every poll fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the proxy URL is invalid or the TLS backend
    /// cannot be initialized.
    pub fn with_options(proxy: Option<&ProxyConfig>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            inner: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self.inner.post(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.body(request.body).send().await?;
        let status = resp.status().as_u16();

        let set_cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = resp.text().await.map_err(Error::from)?;

        trace!(path = request.url.path(), status, "HTTP exchange complete");

        Ok(TransportResponse {
            status,
            body,
            set_cookies,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
