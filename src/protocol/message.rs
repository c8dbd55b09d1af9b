//! Inbound query messages.
//!
//! Messages arrive on the data channel, each carrying the `requestId` of the
//! query that produced it and a `type` describing the job lifecycle event.
//!
//! # Message Types
//!
//! | Type | Meaning |
//! |------|---------|
//! | `SPAWN` | A new job is being initialised |
//! | `INIT`, `START` | A page of work has started |
//! | `STOP` | A job has finished |
//! | `MESSAGE` | Result data |
//! | `ERROR`, `UNAUTH`, `CANCEL` | The query was terminated remotely |
//! | `DISCONNECT` | Synthesized locally when the session is torn down |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// MessageType
// ============================================================================

/// Lifecycle type of a query message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A new job is being initialised remotely.
    Spawn,
    /// A job was initialised.
    Init,
    /// A job started.
    Start,
    /// A job finished.
    Stop,
    /// The query failed remotely.
    Error,
    /// The user is not authorized for the query.
    Unauth,
    /// The query was cancelled remotely.
    Cancel,
    /// Result data.
    Message,
    /// The local session was torn down.
    Disconnect,
    /// Any type this client does not interpret.
    Other(String),
}

impl MessageType {
    /// Returns the wire form of the type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Spawn => "SPAWN",
            Self::Init => "INIT",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Error => "ERROR",
            Self::Unauth => "UNAUTH",
            Self::Cancel => "CANCEL",
            Self::Message => "MESSAGE",
            Self::Disconnect => "DISCONNECT",
            Self::Other(other) => other,
        }
    }

    /// Returns `true` for types that terminate a query regardless of job counts.
    #[inline]
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Unauth | Self::Cancel)
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            "SPAWN" => Self::Spawn,
            "INIT" => Self::Init,
            "START" => Self::Start,
            "STOP" => Self::Stop,
            "ERROR" => Self::Error,
            "UNAUTH" => Self::Unauth,
            "CANCEL" => Self::Cancel,
            "MESSAGE" => Self::Message,
            "DISCONNECT" => Self::Disconnect,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// QueryMessage
// ============================================================================

/// A message routed to a query, wrapping the payload verbatim.
///
/// # Format
///
/// ```json
/// {
///   "type": "MESSAGE",
///   "requestId": "uuid",
///   "data": { "results": [ ... ], "offset": 0, ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMessage {
    raw: Value,
    message_type: MessageType,
}

impl QueryMessage {
    /// Wraps a raw message payload.
    ///
    /// A missing or non-string `type` is treated as [`MessageType::Other`].
    #[must_use]
    pub fn new(raw: Value) -> Self {
        let message_type = raw
            .get("type")
            .and_then(Value::as_str)
            .map_or_else(|| MessageType::Other(String::new()), MessageType::from);
        Self { raw, message_type }
    }

    /// Synthesizes the terminal message delivered when a session disconnects.
    #[must_use]
    pub fn disconnect(request_id: RequestId) -> Self {
        Self::new(json!({ "type": "DISCONNECT", "requestId": request_id }))
    }

    /// Returns the lifecycle type.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// Returns the correlation id, if present and well-formed.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.raw
            .get("requestId")
            .and_then(Value::as_str)
            .and_then(|id| id.parse().ok())
    }

    /// Returns the raw payload.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Consumes the message, returning the raw payload.
    #[inline]
    #[must_use]
    pub fn into_raw(self) -> Value {
        self.raw
    }

    /// Returns the `data` object, if any.
    #[inline]
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.raw.get("data")
    }

    /// Returns the result rows of a `MESSAGE`.
    #[must_use]
    pub fn results(&self) -> Option<&Vec<Value>> {
        self.data()
            .and_then(|data| data.get("results"))
            .and_then(Value::as_array)
    }

    /// Returns the page offset of a `MESSAGE`.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.data_field("offset").and_then(Value::as_u64)
    }

    /// Returns the cookies reported for the scraped page.
    #[must_use]
    pub fn cookies(&self) -> Option<&Vec<Value>> {
        self.data_field("cookies").and_then(Value::as_array)
    }

    /// Returns the connector that produced the data.
    #[must_use]
    pub fn connector_guid(&self) -> Option<&str> {
        self.data_field("connectorGuid").and_then(Value::as_str)
    }

    /// Returns the connector version that produced the data.
    #[must_use]
    pub fn connector_version_guid(&self) -> Option<&str> {
        self.data_field("connectorVersionGuid")
            .and_then(Value::as_str)
    }

    /// Returns the URL of the page the data came from.
    #[must_use]
    pub fn page_url(&self) -> Option<&str> {
        self.data_field("pageUrl").and_then(Value::as_str)
    }

    /// Returns `true` if this is a result message.
    #[inline]
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.message_type == MessageType::Message
    }

    /// Returns `true` if this is an error message.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    /// Returns the `data` payload, or the remote error as [`Error::QueryFailed`].
    ///
    /// A `MESSAGE` whose data carries an `errorType` is also a failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryFailed`] for `ERROR`, `UNAUTH` and `CANCEL`
    /// messages and for result data describing an error.
    pub fn into_result(self) -> Result<Value> {
        let error_type = self
            .data_field("errorType")
            .and_then(Value::as_str)
            .map(str::to_string);

        if self.message_type.is_terminal_failure() || error_type.is_some() {
            let status = self.data_field("status").and_then(Value::as_u64);
            let message = self
                .data_field("error")
                .and_then(Value::as_str)
                .map_or_else(
                    || format!("{} received for query", self.message_type),
                    str::to_string,
                );
            return Err(Error::query_failed(message, error_type.as_deref(), status));
        }

        Ok(self
            .raw
            .get("data")
            .cloned()
            .unwrap_or(Value::Null))
    }

    #[inline]
    fn data_field(&self, key: &str) -> Option<&Value> {
        self.data().and_then(|data| data.get(key))
    }
}

// ============================================================================
// Tests
// ============================================================================
