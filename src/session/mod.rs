//! Bayeux session engine.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Session`] lifecycle, framing and routing |
//! | `loops` | Poll and dispatch background tasks |
//! | `options` | [`SessionConfig`] and credentials |
//! | `registry` | Request id to tracker map |
//! | `tracker` | Per-query job-progress state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Session lifecycle, framing and routing.
pub mod core;

mod loops;

/// Session configuration and credentials.
pub mod options;

/// Outstanding-query registry.
pub mod registry;

/// Per-query state machine.
pub mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{ConnectHook, Session, SessionState};
pub use options::{ApiKey, LoginCredentials, SessionConfig};
pub use registry::{Registry, SharedTracker};
pub use tracker::{QueryCallback, QueryTracker};
