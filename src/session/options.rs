//! Session configuration.
//!
//! Everything a session needs to reach the remote is carried in a
//! [`SessionConfig`] passed at construction. It is immutable afterwards.
//!
//! # Example
//!
//! ```ignore
//! use bayeux_query::session::{ApiKey, SessionConfig};
//!
//! let config = SessionConfig::new()
//!     .with_api_key(ApiKey::new("user-guid", "secret"))
//!     .with_data_channel("/messaging");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Advice;
use crate::protocol::channel::{self, DEFAULT_DATA_CHANNEL};

// ============================================================================
// Constants
// ============================================================================

/// Default query endpoint host.
pub const DEFAULT_HOST: &str = "https://query.import.io";

/// Default login host for cookie-based authentication.
pub const DEFAULT_LOGIN_HOST: &str = "https://api.import.io";

/// Path of the Bayeux endpoint under the host.
pub const DEFAULT_COMET_PATH: &str = "/query/comet/";

/// Default polling period of `join()`.
pub const DEFAULT_JOIN_INTERVAL: Duration = Duration::from_millis(100);

/// Default pause after a failed long-poll.
pub const DEFAULT_POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Client name reported on every request.
pub const DEFAULT_CLIENT_NAME: &str = "bayeux-query Rust client";

/// Client version reported on every request.
pub const DEFAULT_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// ApiKey
// ============================================================================

/// API-key credentials appended to every frame's query string.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    /// User id (`_user`).
    pub user_id: String,
    /// API key (`_apikey`).
    pub api_key: String,
}

impl ApiKey {
    /// Creates API-key credentials.
    #[inline]
    #[must_use]
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("user_id", &self.user_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// LoginCredentials
// ============================================================================

/// Username and password for cookie-based authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl LoginCredentials {
    /// Creates login credentials.
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Connection configuration of a [`Session`](super::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Query endpoint host.
    pub host: Url,

    /// Bayeux endpoint path under `host`.
    pub comet_path: String,

    /// Host of the login endpoint.
    pub login_host: Url,

    /// Channel on which query messages arrive.
    pub data_channel: String,

    /// API-key credentials, if key-based auth is used.
    pub api_key: Option<ApiKey>,

    /// Long-poll advice sent on handshake.
    pub advice: Advice,

    /// Polling period of `join()`.
    pub join_interval: Duration,

    /// Pause after a failed long-poll before the next one.
    pub poll_error_backoff: Duration,

    /// Client name header value.
    pub client_name: String,

    /// Client version header value.
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: default_url(DEFAULT_HOST),
            comet_path: DEFAULT_COMET_PATH.to_string(),
            login_host: default_url(DEFAULT_LOGIN_HOST),
            data_channel: DEFAULT_DATA_CHANNEL.to_string(),
            api_key: None,
            advice: Advice::default(),
            join_interval: DEFAULT_JOIN_INTERVAL,
            poll_error_backoff: DEFAULT_POLL_ERROR_BACKOFF,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionConfig {
    /// Sets the query endpoint host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: Url) -> Self {
        self.host = host;
        self
    }

    /// Sets the login host.
    #[inline]
    #[must_use]
    pub fn with_login_host(mut self, login_host: Url) -> Self {
        self.login_host = login_host;
        self
    }

    /// Sets the data channel.
    #[inline]
    #[must_use]
    pub fn with_data_channel(mut self, channel: impl Into<String>) -> Self {
        self.data_channel = channel.into();
        self
    }

    /// Enables API-key authentication.
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the long-poll advice.
    #[inline]
    #[must_use]
    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice = advice;
        self
    }

    /// Sets the polling period of `join()`.
    #[inline]
    #[must_use]
    pub fn with_join_interval(mut self, interval: Duration) -> Self {
        self.join_interval = interval;
        self
    }

    /// Sets the pause after a failed long-poll.
    #[inline]
    #[must_use]
    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    /// Sets the reported client name and version.
    #[inline]
    #[must_use]
    pub fn with_client_identity(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl SessionConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed data channel, a non-HTTP host
    /// or an empty API key.
    pub fn validate(&self) -> Result<()> {
        if !channel::is_valid(&self.data_channel) || channel::is_meta(&self.data_channel) {
            return Err(Error::config(format!(
                "Invalid data channel: {:?}. Use a non-meta channel such as \"/messaging\".",
                self.data_channel
            )));
        }

        for url in [&self.host, &self.login_host] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "Unsupported URL scheme in {url}. Use http or https."
                )));
            }
        }

        if let Some(key) = &self.api_key
            && (key.user_id.is_empty() || key.api_key.is_empty())
        {
            return Err(Error::config("API key credentials must not be empty"));
        }

        Ok(())
    }

    /// Builds the URL of a frame sent under `path`.
    ///
    /// API-key credentials are appended as `_user` and `_apikey`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the endpoint cannot be joined.
    pub fn frame_url(&self, path: &str) -> Result<Url> {
        let mut url = self.host.join(&self.comet_path)?.join(path)?;

        if let Some(key) = &self.api_key {
            url.query_pairs_mut()
                .append_pair("_user", &key.user_id)
                .append_pair("_apikey", &key.api_key);
        }

        Ok(url)
    }

    /// Builds the login endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the endpoint cannot be joined.
    pub fn login_url(&self) -> Result<Url> {
        Ok(self.login_host.join("/auth/login")?)
    }
}

fn default_url(s: &str) -> Url {
    Url::parse(s).expect("default URL constant is valid")
}

// ============================================================================
// Tests
// ============================================================================
