//! Bayeux wire types.
//!
//! This module defines the message format for communication between the
//! session and the remote long-polling endpoint.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `OutboundEnvelope` | Local → Remote | Meta control or query submission |
//! | `InboundEnvelope` | Remote → Local | Meta replies and data-channel messages |
//! | `QueryMessage` | Remote → Local | Payload of a data-channel envelope |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel names |
//! | `envelope` | Outbound and inbound envelopes |
//! | `message` | Query message types |

// ============================================================================
// Submodules
// ============================================================================

/// Bayeux channel names.
pub mod channel;

/// Outbound and inbound envelopes.
pub mod envelope;

/// Query message types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Advice, InboundEnvelope, OutboundEnvelope};
pub use message::{MessageType, QueryMessage};
