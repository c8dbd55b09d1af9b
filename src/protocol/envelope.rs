//! Bayeux envelopes exchanged with the remote.
//!
//! Every HTTP exchange posts a JSON list holding one outbound envelope and
//! receives a JSON list of inbound envelopes.
//!
//! # Outbound Format
//!
//! ```json
//! [{
//!   "channel": "/meta/connect",
//!   "connectionType": "long-polling",
//!   "id": 7,
//!   "clientId": "3kx9...",
//!   ...extra fields
//! }]
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, MessageId};

use super::channel::CONNECTION_TYPE;

// ============================================================================
// Constants
// ============================================================================

/// Bayeux protocol version offered on handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Oldest Bayeux protocol version accepted on handshake.
pub const MINIMUM_VERSION: &str = "0.9";

/// Error code the remote uses for an unrecognized client id.
const UNKNOWN_CLIENT_CODE: &str = "402";

// ============================================================================
// Advice
// ============================================================================

/// Long-poll timing advice sent on handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// Milliseconds the remote may hold a long-poll open.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,

    /// Milliseconds to wait between long-polls.
    #[serde(rename = "interval")]
    pub interval_ms: u64,
}

impl Default for Advice {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            interval_ms: 0,
        }
    }
}

// ============================================================================
// OutboundEnvelope
// ============================================================================

/// A single outbound frame.
///
/// Built by the session's frame path, which stamps the channel, message id
/// and client id onto caller-supplied fields.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    /// Target channel.
    pub channel: String,

    /// Always `long-polling`.
    #[serde(rename = "connectionType")]
    pub connection_type: &'static str,

    /// Strictly increasing frame number.
    pub id: MessageId,

    /// Client id, once registered.
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,

    /// Channel-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundEnvelope {
    /// Creates an envelope stamped with the given frame metadata.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        id: MessageId,
        client_id: Option<ClientId>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            channel: channel.into(),
            connection_type: CONNECTION_TYPE,
            id,
            client_id,
            fields,
        }
    }

    /// Serializes the envelope as the single-element list the remote expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a field fails to serialize.
    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(&[self])?)
    }
}

// ============================================================================
// Field Builders
// ============================================================================

/// Fields of a handshake request.
#[must_use]
pub fn handshake_fields(advice: Advice) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("version".into(), json!(PROTOCOL_VERSION));
    fields.insert("minimumVersion".into(), json!(MINIMUM_VERSION));
    fields.insert("supportedConnectionTypes".into(), json!([CONNECTION_TYPE]));
    fields.insert("advice".into(), json!(advice));
    fields
}

/// Fields of a subscribe request.
#[must_use]
pub fn subscribe_fields(channel: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("subscription".into(), json!(channel));
    fields
}

/// Fields of a query submission.
#[must_use]
pub fn query_fields(query: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("data".into(), query);
    fields
}

// ============================================================================
// InboundEnvelope
// ============================================================================

/// A single envelope from a response body.
///
/// Only the fields the engine inspects are typed; anything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEnvelope {
    /// Channel the envelope arrived on.
    #[serde(default)]
    pub channel: Option<String>,

    /// Present on replies to meta and service requests.
    #[serde(default)]
    pub successful: Option<bool>,

    /// Failure reason, e.g. `402::Unknown client`.
    #[serde(default)]
    pub error: Option<String>,

    /// Client id assigned on handshake.
    #[serde(rename = "clientId", default)]
    pub client_id: Option<ClientId>,

    /// Payload forwarded to query trackers.
    #[serde(default)]
    pub data: Option<Value>,
}

impl InboundEnvelope {
    /// Parses a response body into its envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the body is not a list of envelopes.
    pub fn parse_body(body: &str) -> Result<Vec<Self>> {
        serde_json::from_str(body)
            .map_err(|e| Error::protocol(format!("Malformed response body: {e}")))
    }

    /// Returns `true` if the envelope is marked unsuccessful.
    #[inline]
    #[must_use]
    pub fn is_unsuccessful(&self) -> bool {
        self.successful == Some(false)
    }

    /// Returns `true` if the failure reason is an unrecognized client id.
    ///
    /// Bayeux error strings have the form `code:args:message`.
    #[must_use]
    pub fn is_unknown_client(&self) -> bool {
        self.error
            .as_deref()
            .and_then(|error| error.split(':').next())
            .is_some_and(|code| code == UNKNOWN_CLIENT_CODE)
    }

    /// Returns `true` if the envelope arrived on `channel`.
    #[inline]
    #[must_use]
    pub fn is_on(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }

    /// Describes the failure for logs and errors.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        format!(
            "Unsuccessful request on {}: {}",
            self.channel.as_deref().unwrap_or("<no channel>"),
            self.error.as_deref().unwrap_or("no reason given")
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
