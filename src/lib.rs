//! Bayeux query client - long-polling client for a CometD-style query service.
//!
//! This library submits queries to a remote extraction service over the
//! Bayeux protocol and streams each query's progress messages back to a
//! per-query callback.
//!
//! # Architecture
//!
//! The client follows the Bayeux long-polling model:
//!
//! - **Foreground**: connects, submits queries, waits for completion
//! - **Poll loop**: keeps one `/meta/connect` request outstanding
//! - **Dispatch loop**: routes inbound data-channel messages to trackers
//!
//! Key design principles:
//!
//! - Each [`Session`] owns: client id + message-id counter + both loops
//! - Every query is correlated by a [`RequestId`] written into the query
//! - A [`QueryTracker`] decides completion from the job lifecycle messages
//! - Disconnect delivers exactly one `DISCONNECT` to every pending query
//!
//! # Quick Start
//!
//! ```no_run
//! use bayeux_query::{Client, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .api_key("user-guid", "api-key")
//!         .build()?;
//!
//!     client.connect().await?;
//!
//!     client
//!         .query(
//!             json!({
//!                 "connectorGuids": ["connector-guid"],
//!                 "input": { "webpage/url": "https://example.com" }
//!             }),
//!             |tracker, message| {
//!                 println!("{} {}", tracker.request_id(), message.message_type());
//!             },
//!         )
//!         .await?;
//!
//!     client.join().await;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | High-level [`Client`] and [`ClientBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Bayeux envelopes and query messages |
//! | [`session`] | [`Session`] engine, registry and trackers |
//! | [`transport`] | HTTP transport and cookie jar |
//!
//! # Features
//!
//! - **`reqwest`** (default): built-in HTTP transport
//! - **Cookie or API-key auth**: login once, or sign every frame
//! - **Stale-client recovery**: reconnects when the remote forgets the client id

// ============================================================================
// Modules
// ============================================================================

/// High-level client.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing correlation, client and message ids.
pub mod identifiers;

/// Bayeux protocol types.
///
/// Envelopes on the wire and the query messages they carry.
pub mod protocol;

/// Session engine.
///
/// Lifecycle, framing, routing and the background loops.
pub mod session;

/// HTTP transport layer.
///
/// The [`Transport`] seam, the `reqwest` implementation and cookies.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, Submission};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, MessageId, RequestId};

// Protocol types
pub use protocol::{Advice, MessageType, QueryMessage};

// Session types
pub use session::{
    ApiKey, ConnectHook, LoginCredentials, QueryCallback, QueryTracker, Session, SessionConfig,
    SessionState,
};

// Transport types
#[cfg(feature = "reqwest")]
pub use transport::HttpTransport;
pub use transport::{CookieJar, ProxyConfig, Transport, TransportRequest, TransportResponse};
