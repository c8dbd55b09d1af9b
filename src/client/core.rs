//! High-level query client.
//!
//! [`Client`] wraps a [`Session`] and accepts queries before the session is
//! connected: those are held and submitted, in order, as soon as
//! [`Client::connect`] succeeds.
//!
//! # Example
//!
//! ```no_run
//! use bayeux_query::{Client, Submission};
//! use serde_json::json;
//!
//! # async fn example() -> bayeux_query::Result<()> {
//! let client = Client::builder().api_key("user-guid", "api-key").build()?;
//!
//! let submission = client
//!     .query(json!({ "connectorGuids": ["guid"] }), |tracker, message| {
//!         println!("{}: {}", tracker.request_id(), message.message_type());
//!     })
//!     .await?;
//! assert_eq!(submission, Submission::Queued);
//!
//! client.connect().await?;
//! client.join().await;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::QueryMessage;
use crate::session::{ConnectHook, LoginCredentials, QueryTracker, Session};

use super::builder::ClientBuilder;

// ============================================================================
// Types
// ============================================================================

/// Outcome of [`Client::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Sent to the remote under this correlation id.
    Sent(RequestId),
    /// Held until the client connects.
    Queued,
}

impl Submission {
    /// Returns the correlation id if the query was sent.
    #[inline]
    #[must_use]
    pub fn request_id(self) -> Option<RequestId> {
        match self {
            Self::Sent(request_id) => Some(request_id),
            Self::Queued => None,
        }
    }
}

/// Callback kept by the client so a refused submission can be retried.
type SharedCallback = Arc<dyn Fn(&QueryTracker, &QueryMessage) + Send + Sync>;

/// A query waiting for the client to connect.
struct PendingQuery {
    query: Value,
    callback: SharedCallback,
}

struct ClientInner {
    session: Session,
    pending: Mutex<Vec<PendingQuery>>,
}

// ============================================================================
// Client
// ============================================================================

/// Query client with a pre-connect submission queue.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.inner.session)
            .field("queued", &self.queued())
            .finish()
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Wraps an existing session.
    ///
    /// Installs a connect hook on `session` that submits held queries, so
    /// they also go out after a reconnect the session starts on its own.
    /// Any hook already installed is replaced.
    #[must_use]
    pub fn new(session: Session) -> Self {
        let inner = Arc::new(ClientInner {
            session,
            pending: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let hook: ConnectHook = Arc::new(move |_: Session| -> BoxFuture<'static, Result<()>> {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(inner) => Client { inner }.flush_pending().await,
                    None => Ok(()),
                }
            })
        });
        inner.session.set_connect_hook(hook);

        Self { inner }
    }

    /// Returns the underlying session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Returns `true` while the session is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.session.is_connected()
    }

    /// Returns the number of queries held for the next connect.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Connects the session and submits every held query.
    ///
    /// While the session is busy connecting or disconnecting elsewhere this
    /// returns `Ok(())` and held queries stay held for the next connect.
    ///
    /// # Errors
    ///
    /// Returns the connect failure, or the first failed submission. Held
    /// queries are all attempted either way.
    pub async fn connect(&self) -> Result<()> {
        self.inner.session.connect().await?;
        self.flush_pending().await
    }

    /// Logs in with username and password, then connects.
    ///
    /// # Errors
    ///
    /// Returns the login or connect failure.
    pub async fn login(&self, credentials: LoginCredentials) -> Result<()> {
        self.inner.session.login(credentials).await?;
        self.connect().await
    }

    /// Reconnects the session and submits any held queries.
    ///
    /// # Errors
    ///
    /// Returns the reconnect failure, or the first failed submission.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.session.reconnect().await?;
        self.flush_pending().await
    }

    /// Disconnects the session. Held queries stay held.
    pub async fn disconnect(&self) {
        self.inner.session.disconnect().await;
    }

    /// Waits until no submitted query is outstanding.
    pub async fn join(&self) {
        self.inner.session.join().await;
    }

    /// Submits `query`, or holds it if the session is not connected.
    ///
    /// A query the session refuses because it stopped being connected in
    /// the meantime is held as well.
    ///
    /// # Errors
    ///
    /// Returns the submission failure of a query sent immediately.
    pub async fn query<F>(&self, query: Value, callback: F) -> Result<Submission>
    where
        F: Fn(&QueryTracker, &QueryMessage) + Send + Sync + 'static,
    {
        let callback: SharedCallback = Arc::new(callback);

        loop {
            {
                let mut pending = self.inner.pending.lock();
                if !self.inner.session.is_connected() {
                    pending.push(PendingQuery { query, callback });
                    debug!(queued = pending.len(), "Query held until connect");
                    return Ok(Submission::Queued);
                }
            }

            if let Err(e) = self.flush_pending().await {
                debug!(error = %e, "Not every held query was submitted");
            }

            match self.submit(query.clone(), &callback).await {
                Err(Error::NotConnected) => continue,
                result => return result.map(Submission::Sent),
            }
        }
    }
}

// ============================================================================
// Client - Held Queries
// ============================================================================

impl Client {
    /// Submits every held query in order.
    ///
    /// Queries refused because the session left `Connected` are held again,
    /// ahead of anything queued meanwhile.
    async fn flush_pending(&self) -> Result<()> {
        let mut first_error = None;

        while self.inner.session.is_connected() {
            let batch = std::mem::take(&mut *self.inner.pending.lock());
            if batch.is_empty() {
                break;
            }

            debug!(count = batch.len(), "Submitting held queries");

            let mut held = Vec::new();
            for pending in batch {
                match self.submit(pending.query.clone(), &pending.callback).await {
                    Ok(_) => {}
                    Err(Error::NotConnected) => held.push(pending),
                    Err(e) => {
                        warn!(error = %e, "Held query submission failed");
                        first_error.get_or_insert(e);
                    }
                }
            }

            if held.is_empty() {
                break;
            }

            debug!(count = held.len(), "Session left connected, holding queries again");
            let mut pending = self.inner.pending.lock();
            held.append(&mut pending);
            *pending = held;
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn submit(&self, query: Value, callback: &SharedCallback) -> Result<RequestId> {
        let callback = Arc::clone(callback);
        self.inner
            .session
            .query(
                query,
                Box::new(move |tracker: &QueryTracker, message: &QueryMessage| {
                    callback(tracker, message);
                }),
            )
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
