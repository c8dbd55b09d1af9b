//! Background tasks of a connected session.
//!
//! Both loops hold only a weak reference to the session, so dropping the last
//! [`Session`] handle ends them.
//!
//! # Poll Loop
//!
//! Keeps exactly one `/meta/connect` long-poll outstanding while connected.
//! A failed poll is logged and retried after a short backoff.
//!
//! # Dispatch Loop
//!
//! Drains the inbound queue one payload at a time, so callbacks for the
//! session run in arrival order and never concurrently.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Weak;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::protocol::channel::META_CONNECT;

use super::core::{Session, SessionInner};

// ============================================================================
// Poll Loop
// ============================================================================

/// Issues long-polls until the session leaves `Connected` or is dropped.
pub(super) async fn run_poll_loop(weak: Weak<SessionInner>) {
    debug!("Poll loop started");

    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = Session::from_inner(inner);
        if !session.is_connected() {
            break;
        }

        if let Err(e) = session
            .frame_request(META_CONNECT, "connect", Map::new(), false)
            .await
        {
            warn!(error = %e, "Long-poll failed");
            let backoff = session.config().poll_error_backoff;
            drop(session);
            sleep(backoff).await;
        }
    }

    debug!("Poll loop terminated");
}

// ============================================================================
// Dispatch Loop
// ============================================================================

/// Routes queued payloads to their trackers until the queue closes.
pub(super) async fn run_dispatch_loop(
    weak: Weak<SessionInner>,
    mut inbound: mpsc::UnboundedReceiver<Value>,
) {
    debug!("Dispatch loop started");

    while let Some(data) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        Session::from_inner(inner).process_message(data);
    }

    debug!("Dispatch loop terminated");
}
