//! Correlation map from request id to query tracker.
//!
//! The registry is the only state shared between the foreground (which
//! inserts trackers), the dispatch loop (which looks them up and removes the
//! finished ones) and disconnect (which drains everything). Every operation
//! takes the map lock once and never calls out while holding it.
//!
//! Trackers are individually locked: delivering a message and force-finishing
//! the same tracker are serialized on the tracker's own mutex.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::tracker::QueryTracker;

// ============================================================================
// Types
// ============================================================================

/// A tracker shared between the registry and whoever is delivering to it.
pub type SharedTracker = Arc<Mutex<QueryTracker>>;

/// Map of request IDs to trackers.
type TrackerMap = FxHashMap<RequestId, SharedTracker>;

// ============================================================================
// Registry
// ============================================================================

/// Thread-safe map of outstanding queries.
#[derive(Debug, Default)]
pub struct Registry {
    trackers: Mutex<TrackerMap>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tracker` under `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequest`] if the id is already registered.
    pub fn put(&self, request_id: RequestId, tracker: QueryTracker) -> Result<SharedTracker> {
        let mut trackers = self.trackers.lock();
        if trackers.contains_key(&request_id) {
            return Err(Error::duplicate_request(request_id));
        }

        let shared = Arc::new(Mutex::new(tracker));
        trackers.insert(request_id, Arc::clone(&shared));
        trace!(%request_id, outstanding = trackers.len(), "Tracker registered");

        Ok(shared)
    }

    /// Looks up the tracker for `request_id`.
    #[must_use]
    pub fn get(&self, request_id: &RequestId) -> Option<SharedTracker> {
        self.trackers.lock().get(request_id).cloned()
    }

    /// Removes the tracker for `request_id`, returning it if present.
    pub fn remove(&self, request_id: &RequestId) -> Option<SharedTracker> {
        self.trackers.lock().remove(request_id)
    }

    /// Atomically empties the registry, returning its prior contents.
    #[must_use]
    pub fn drain_all(&self) -> Vec<(RequestId, SharedTracker)> {
        let drained = std::mem::take(&mut *self.trackers.lock());
        drained.into_iter().collect()
    }

    /// Returns the number of outstanding queries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.trackers.lock().len()
    }

    /// Returns `true` if no query is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trackers.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
