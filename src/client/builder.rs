//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use bayeux_query::Client;
//!
//! # fn example() -> bayeux_query::Result<()> {
//! let client = Client::builder()
//!     .api_key("user-guid", "api-key")
//!     .proxy("127.0.0.1", 8888)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::session::{ApiKey, Session, SessionConfig};
use crate::transport::{ProxyConfig, Transport};

use super::core::Client;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Query endpoint host.
    host: Option<String>,
    /// Login endpoint host.
    login_host: Option<String>,
    /// API-key credentials.
    api_key: Option<ApiKey>,
    /// Data channel override.
    data_channel: Option<String>,
    /// HTTP proxy.
    proxy: Option<ProxyConfig>,
    /// Per-request timeout of the HTTP transport.
    request_timeout: Option<Duration>,
    /// Polling period of `join()`.
    join_interval: Option<Duration>,
    /// Reported client name and version.
    client_identity: Option<(String, String)>,
    /// Custom transport, replacing the HTTP one.
    transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("host", &self.host)
            .field("login_host", &self.login_host)
            .field("api_key", &self.api_key)
            .field("data_channel", &self.data_channel)
            .field("proxy", &self.proxy)
            .field("request_timeout", &self.request_timeout)
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query endpoint host, e.g. `https://query.import.io`.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the login endpoint host.
    #[inline]
    #[must_use]
    pub fn login_host(mut self, host: impl Into<String>) -> Self {
        self.login_host = Some(host.into());
        self
    }

    /// Authenticates every frame with a user id and API key.
    #[inline]
    #[must_use]
    pub fn api_key(mut self, user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(user_id, api_key));
        self
    }

    /// Sets the channel on which query messages arrive.
    #[inline]
    #[must_use]
    pub fn data_channel(mut self, channel: impl Into<String>) -> Self {
        self.data_channel = Some(channel.into());
        self
    }

    /// Routes every request through an HTTP proxy.
    #[inline]
    #[must_use]
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy = Some(ProxyConfig::new(host, port));
        self
    }

    /// Sets the per-request timeout of the HTTP transport.
    ///
    /// Must exceed the long-poll advice timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the polling period of `join()`.
    #[inline]
    #[must_use]
    pub fn join_interval(mut self, interval: Duration) -> Self {
        self.join_interval = Some(interval);
        self
    }

    /// Sets the client name and version reported on every request.
    #[inline]
    #[must_use]
    pub fn client_identity(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_identity = Some((name.into(), version.into()));
        self
    }

    /// Uses a custom transport instead of the built-in HTTP one.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable host, an invalid data
    /// channel, a request timeout not above the long-poll timeout, or when
    /// no transport is available.
    pub fn build(self) -> Result<Client> {
        let config = self.build_config()?;
        let transport = self.build_transport()?;
        Ok(Client::new(Session::new(config, transport)))
    }
}

// ============================================================================
// ClientBuilder - Validation
// ============================================================================

impl ClientBuilder {
    fn build_config(&self) -> Result<SessionConfig> {
        let mut config = SessionConfig::new();

        if let Some(host) = &self.host {
            config = config.with_host(parse_host(host)?);
        }
        if let Some(host) = &self.login_host {
            config = config.with_login_host(parse_host(host)?);
        }
        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key.clone());
        }
        if let Some(channel) = &self.data_channel {
            config = config.with_data_channel(channel.clone());
        }
        if let Some(interval) = self.join_interval {
            config = config.with_join_interval(interval);
        }
        if let Some((name, version)) = &self.client_identity {
            config = config.with_client_identity(name.clone(), version.clone());
        }

        if let Some(timeout) = self.request_timeout {
            let poll = Duration::from_millis(config.advice.timeout_ms);
            if timeout <= poll {
                return Err(Error::config(format!(
                    "Request timeout {timeout:?} must exceed the long-poll timeout {poll:?}"
                )));
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn build_transport(&self) -> Result<Arc<dyn Transport>> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }

        #[cfg(feature = "reqwest")]
        {
            let transport = crate::transport::HttpTransport::with_options(
                self.proxy.as_ref(),
                self.request_timeout,
            )?;
            Ok(Arc::new(transport))
        }

        #[cfg(not(feature = "reqwest"))]
        {
            Err(Error::config(
                "No transport configured. Enable the `reqwest` feature or call transport().",
            ))
        }
    }
}

fn parse_host(host: &str) -> Result<Url> {
    Url::parse(host).map_err(|e| Error::config(format!("Invalid host {host:?}: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
