//! Error types for the query session engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bayeux_query::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.connect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Transport | [`Error::RequestFailed`], [`Error::Http`] |
//! | Protocol | [`Error::Protocol`], [`Error::Handshake`], [`Error::NotConnected`], [`Error::DuplicateRequest`] |
//! | Query | [`Error::QueryFailed`] |
//! | External | [`Error::Json`], [`Error::Url`] |
//!
//! Stale client ids and messages for unknown queries are not errors: the
//! session recovers from the former and logs the latter.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client or session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The remote answered with a non-success HTTP status.
    ///
    /// Returned for frames whose call site does not tolerate failure,
    /// and for a rejected login.
    #[error("{message} (code: {status})")]
    RequestFailed {
        /// Description of the failed request.
        message: String,
        /// HTTP status code returned by the remote.
        status: u16,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// An envelope was marked unsuccessful, or a response was malformed.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol failure.
        message: String,
    },

    /// Handshake did not yield a client id.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// Operation requires a connected session.
    #[error("Session is not connected")]
    NotConnected,

    /// A tracker is already registered under this correlation id.
    #[error("Duplicate request id: {request_id}")]
    DuplicateRequest {
        /// The colliding correlation id.
        request_id: RequestId,
    },

    // ========================================================================
    // Query Errors
    // ========================================================================
    /// The remote reported a failure for a specific query.
    ///
    /// Produced by [`QueryMessage::into_result`](crate::QueryMessage::into_result);
    /// the engine itself delivers query failures to callbacks as data.
    #[error("Query failed: {message}")]
    QueryFailed {
        /// Error description, including the remote error type and status.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// HTTP client error.
    #[cfg(feature = "reqwest")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a request failed error.
    #[inline]
    pub fn request_failed(message: impl Into<String>, status: u16) -> Self {
        Self::RequestFailed {
            message: message.into(),
            status,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a duplicate request error.
    #[inline]
    pub fn duplicate_request(request_id: RequestId) -> Self {
        Self::DuplicateRequest { request_id }
    }

    /// Creates a query failed error.
    ///
    /// The remote error type and status are appended when present.
    pub fn query_failed(
        message: impl Into<String>,
        error_type: Option<&str>,
        status: Option<u64>,
    ) -> Self {
        let message = message.into();
        let message = match (error_type, status) {
            (Some(kind), Some(code)) => format!("{message} ({kind}, code: {code})"),
            (Some(kind), None) => format!("{message} ({kind})"),
            (None, Some(code)) => format!("{message} (code: {code})"),
            (None, None) => message,
        };
        Self::QueryFailed { message }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from the HTTP exchange itself.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        match self {
            Self::RequestFailed { .. } => true,
            #[cfg(feature = "reqwest")]
            Self::Http(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a Bayeux-level protocol error.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::Handshake { .. } | Self::NotConnected
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed after a reconnect or retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RequestFailed { status, .. } => *status >= 500,
            Self::NotConnected | Self::Handshake { .. } => true,
            #[cfg(feature = "reqwest")]
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
