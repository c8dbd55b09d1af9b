//! High-level client over a session.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Session wrapper with a pre-connect query queue |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`Submission`] | Whether a query was sent or held |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for client configuration.
pub mod builder;

/// Client implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use self::core::{Client, Submission};
