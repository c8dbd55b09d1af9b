//! Per-query job-progress state machine.
//!
//! The remote runs each query as a set of jobs and reports their lifecycle on
//! the data channel. A [`QueryTracker`] counts those events to decide when the
//! query has finished, and forwards every message to the caller's callback.
//!
//! # Completion Rule
//!
//! After each counter update:
//!
//! ```text
//! finished = started == completed
//!         && spawned + 1 == started
//!         && started > 0
//! ```
//!
//! The `+ 1` covers the implicit initial spawn that precedes any explicit
//! `SPAWN`. `ERROR`, `UNAUTH` and `CANCEL` finish the query outright.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;
use tracing::trace;

use crate::identifiers::RequestId;
use crate::protocol::{MessageType, QueryMessage};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked once per message delivered to a query.
///
/// Receives the tracker (already updated for the message) and the message.
pub type QueryCallback = Box<dyn Fn(&QueryTracker, &QueryMessage) + Send + Sync>;

// ============================================================================
// QueryTracker
// ============================================================================

/// Tracks the job lifecycle of one outstanding query.
pub struct QueryTracker {
    request_id: RequestId,
    query: Value,
    jobs_spawned: u32,
    jobs_started: u32,
    jobs_completed: u32,
    finished: bool,
    callback: QueryCallback,
}

impl fmt::Debug for QueryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTracker")
            .field("request_id", &self.request_id)
            .field("jobs_spawned", &self.jobs_spawned)
            .field("jobs_started", &self.jobs_started)
            .field("jobs_completed", &self.jobs_completed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl QueryTracker {
    /// Creates a tracker for the query submitted under `request_id`.
    #[must_use]
    pub fn new(request_id: RequestId, query: Value, callback: QueryCallback) -> Self {
        Self {
            request_id,
            query,
            jobs_spawned: 0,
            jobs_started: 0,
            jobs_completed: 0,
            finished: false,
            callback,
        }
    }

    /// Advances the state machine and forwards `message` to the callback.
    ///
    /// Once finished, the counters no longer change but the message is still
    /// forwarded.
    pub fn observe(&mut self, message: &QueryMessage) {
        if !self.finished {
            self.advance(message.message_type());
        }

        trace!(
            request_id = %self.request_id,
            message_type = %message.message_type(),
            finished = self.finished,
            "Query message observed"
        );

        (self.callback)(self, message);
    }

    /// Marks the query finished and forwards a terminal `message`.
    ///
    /// Used when the session is torn down with the query still pending.
    pub(crate) fn finish_with(&mut self, message: &QueryMessage) {
        self.finished = true;
        (self.callback)(self, message);
    }

    /// Returns `true` once the query has completed or been terminated.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the correlation id of the query.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the submitted query, including its `requestId`.
    #[inline]
    #[must_use]
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Returns the number of `SPAWN` messages seen.
    #[inline]
    #[must_use]
    pub fn jobs_spawned(&self) -> u32 {
        self.jobs_spawned
    }

    /// Returns the number of `INIT` and `START` messages seen.
    #[inline]
    #[must_use]
    pub fn jobs_started(&self) -> u32 {
        self.jobs_started
    }

    /// Returns the number of `STOP` messages seen.
    #[inline]
    #[must_use]
    pub fn jobs_completed(&self) -> u32 {
        self.jobs_completed
    }

    fn advance(&mut self, message_type: &MessageType) {
        match message_type {
            MessageType::Spawn => self.jobs_spawned += 1,
            MessageType::Init | MessageType::Start => self.jobs_started += 1,
            MessageType::Stop => self.jobs_completed += 1,
            _ => {}
        }

        self.finished = self.jobs_started == self.jobs_completed
            && self.jobs_spawned + 1 == self.jobs_started
            && self.jobs_started > 0;

        if message_type.is_terminal_failure() {
            self.finished = true;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
