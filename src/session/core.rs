//! Bayeux session: lifecycle, framing and message routing.
//!
//! A [`Session`] owns one logical connection to the query endpoint. It
//! handshakes for a client id, subscribes to the data channel, and then runs
//! two background tasks until disconnected:
//!
//! - the poll loop, which keeps one `/meta/connect` long-poll outstanding
//! - the dispatch loop, which routes inbound data-channel messages to their
//!   query trackers in arrival order
//!
//! # State Machine
//!
//! ```text
//!          connect()              handshake + subscribe ok
//!   Idle ───────────► Connecting ─────────────────────────► Connected
//!    ▲                    │ failure                            │
//!    ├────────────────────┘                                    │ disconnect()
//!    │                  notify pending queries                 ▼
//!    └────────────────────────────────────────────────── Disconnecting
//! ```
//!
//! Responses that arrive while the session is neither connecting nor
//! connected are discarded without inspection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, MessageId, RequestId};
use crate::protocol::channel::{
    META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, SERVICE_QUERY,
};
use crate::protocol::envelope::{handshake_fields, query_fields, subscribe_fields};
use crate::protocol::{InboundEnvelope, OutboundEnvelope, QueryMessage};
use crate::transport::{
    CookieJar, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, Transport, TransportRequest,
};

use super::loops;
use super::options::{LoginCredentials, SessionConfig};
use super::registry::Registry;
use super::tracker::{QueryCallback, QueryTracker};

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the client name.
const CLIENT_NAME_HEADER: &str = "import-io-client";

/// Header carrying the client version.
const CLIENT_VERSION_HEADER: &str = "import-io-client-version";

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not connected. Initial and final state.
    Idle,
    /// Handshake or subscribe in progress.
    Connecting,
    /// Handshaken, subscribed, loops running.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

impl SessionState {
    /// Returns `true` while responses should be processed.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Hook run after every successful connect, including stale-client reconnects.
///
/// An error from the hook is returned by [`Session::connect`]; the session
/// stays connected.
pub type ConnectHook = Arc<dyn Fn(Session) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Message-id counter and client id, stamped together on every frame.
struct FrameState {
    next_id: MessageId,
    client_id: Option<ClientId>,
}

/// Handles of the running background loops.
#[derive(Default)]
struct BackgroundTasks {
    poll: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn abort_all(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.abort();
        }
    }
}

/// Internal shared state for the session.
pub(crate) struct SessionInner {
    /// Immutable connection configuration.
    pub config: SessionConfig,

    /// HTTP exchange implementation.
    transport: Arc<dyn Transport>,

    /// Cookies shared by every request of the session.
    cookies: CookieJar,

    /// Lifecycle state.
    state: Mutex<SessionState>,

    /// Next message id and current client id.
    frame: Mutex<FrameState>,

    /// Outstanding queries.
    registry: Registry,

    /// Producer side of the inbound queue. `None` outside a connection.
    inbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,

    /// Poll and dispatch loop handles.
    tasks: Mutex<BackgroundTasks>,

    /// Credentials of the last successful login, replayed on reconnect.
    login: Mutex<Option<LoginCredentials>>,

    /// Set while a stale-client reconnect is running.
    reconnecting: AtomicBool,

    /// Run once the session reaches `Connected`.
    on_connect: Mutex<Option<ConnectHook>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
    }
}

// ============================================================================
// Session
// ============================================================================

/// A Bayeux long-polling session against the query endpoint.
///
/// Cheap to clone; clones share the same connection.
///
/// # Example
///
/// ```ignore
/// use bayeux_query::session::{Session, SessionConfig};
///
/// let session = Session::new(SessionConfig::new(), transport);
/// session.connect().await?;
///
/// session
///     .query(query, Box::new(|tracker, message| {
///         println!("{} -> {}", tracker.request_id(), message.message_type());
///     }))
///     .await?;
///
/// session.join().await;
/// session.disconnect().await;
/// ```
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.inner.config.host.as_str())
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction and Accessors
// ============================================================================

impl Session {
    /// Creates an idle session.
    #[must_use]
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                cookies: CookieJar::new(),
                state: Mutex::new(SessionState::Idle),
                frame: Mutex::new(FrameState {
                    next_id: MessageId::FIRST,
                    client_id: None,
                }),
                registry: Registry::new(),
                inbound: Mutex::new(None),
                tasks: Mutex::new(BackgroundTasks::default()),
                login: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                on_connect: Mutex::new(None),
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Returns `true` once connect has completed and until disconnect starts.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Returns the client id assigned by the last handshake.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.inner.frame.lock().client_id.clone()
    }

    /// Returns the number of queries not yet finished.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the registry of outstanding queries.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Returns the cookie jar shared by all requests.
    #[inline]
    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.inner.cookies
    }

    /// Installs the hook run after every successful connect.
    ///
    /// Replaces any previously installed hook.
    pub fn set_connect_hook(&self, hook: ConnectHook) {
        *self.inner.on_connect.lock() = Some(hook);
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.inner.state.lock();
        trace!(from = %*current, to = %state, "Session state change");
        *current = state;
    }

    /// Moves from `from` to `to`, returning `false` if not in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut current = self.inner.state.lock();
        if *current != from {
            return false;
        }
        trace!(from = %from, to = %to, "Session state change");
        *current = to;
        true
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Handshakes, subscribes to the data channel and starts the loops.
    ///
    /// Does nothing unless the session is idle. Once connected, the hook
    /// installed with [`Session::set_connect_hook`] runs.
    ///
    /// # Errors
    ///
    /// Returns the handshake or subscribe failure, in which case the session
    /// is left idle. Returns the connect hook's failure with the session
    /// left connected.
    pub async fn connect(&self) -> Result<()> {
        if !self.transition(SessionState::Idle, SessionState::Connecting) {
            debug!(state = %self.state(), "Connect ignored, session not idle");
            return Ok(());
        }

        info!(host = %self.inner.config.host, "Connecting session");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *self.inner.inbound.lock() = Some(inbound_tx);

        if let Err(e) = self.establish().await {
            warn!(error = %e, "Connect failed");
            self.inner.inbound.lock().take();
            self.inner.frame.lock().client_id = None;
            self.set_state(SessionState::Idle);
            return Err(e);
        }

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.abort_all();
            self.set_state(SessionState::Connected);

            let weak = Arc::downgrade(&self.inner);
            tasks.poll = Some(tokio::spawn(loops::run_poll_loop(weak.clone())));
            tasks.dispatch = Some(tokio::spawn(loops::run_dispatch_loop(weak, inbound_rx)));
        }

        info!(client_id = ?self.client_id(), "Session connected");

        let hook = self.inner.on_connect.lock().clone();
        match hook {
            Some(hook) => hook(self.clone()).await,
            None => Ok(()),
        }
    }

    async fn establish(&self) -> Result<()> {
        let client_id = self.handshake().await?;
        debug!(%client_id, "Handshake completed");

        let channel = self.inner.config.data_channel.clone();
        self.subscribe(&channel).await?;
        debug!(%channel, "Subscribed");

        Ok(())
    }

    /// Performs the Bayeux handshake and stores the returned client id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if no client id is returned, or the frame
    /// failure.
    pub async fn handshake(&self) -> Result<ClientId> {
        let fields = handshake_fields(self.inner.config.advice);
        let envelopes = self
            .frame_request(META_HANDSHAKE, "handshake", fields, false)
            .await?
            .ok_or_else(|| Error::handshake("Handshake response was discarded"))?;

        let client_id = envelopes
            .into_iter()
            .find_map(|envelope| envelope.client_id)
            .ok_or_else(|| Error::handshake("No client id in handshake response"))?;

        self.inner.frame.lock().client_id = Some(client_id.clone());
        Ok(client_id)
    }

    /// Subscribes the session to `channel`.
    ///
    /// # Errors
    ///
    /// Returns the frame failure.
    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        self.frame_request(META_SUBSCRIBE, "", subscribe_fields(channel), false)
            .await?;
        Ok(())
    }

    /// Tears the session down.
    ///
    /// Every query still pending receives exactly one synthetic `DISCONNECT`
    /// message. Does nothing unless the session is connected.
    pub async fn disconnect(&self) {
        if !self.transition(SessionState::Connected, SessionState::Disconnecting) {
            debug!(state = %self.state(), "Disconnect ignored, session not connected");
            return;
        }

        info!(client_id = ?self.client_id(), "Disconnecting session");

        let pending = self.inner.registry.drain_all();

        if let Some(dispatch) = self.inner.tasks.lock().dispatch.take() {
            dispatch.abort();
        }
        self.inner.inbound.lock().take();

        if let Err(e) = self
            .frame_request(META_DISCONNECT, "", Map::new(), true)
            .await
        {
            warn!(error = %e, "Disconnect request failed");
        }

        self.inner.frame.lock().client_id = None;
        self.set_state(SessionState::Idle);

        let count = pending.len();
        for (request_id, tracker) in pending {
            let mut tracker = tracker.lock();
            if !tracker.is_finished() {
                tracker.finish_with(&QueryMessage::disconnect(request_id));
            }
        }

        if count > 0 {
            debug!(count, "Notified pending queries on disconnect");
        }
        info!("Session disconnected");
    }

    /// Disconnects, logs in again if credentials are stored, and connects.
    ///
    /// # Errors
    ///
    /// Returns the login or connect failure.
    pub async fn reconnect(&self) -> Result<()> {
        info!("Reconnecting session");
        self.disconnect().await;

        let credentials = self.inner.login.lock().clone();
        if let Some(credentials) = credentials {
            self.login(credentials).await?;
        }

        self.connect().await
    }

    /// Authenticates with username and password.
    ///
    /// The session cookie is kept in the jar and sent on every later frame.
    /// Credentials are remembered for reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestFailed`] unless the login endpoint answers 200.
    pub async fn login(&self, credentials: LoginCredentials) -> Result<()> {
        let url = self.inner.config.login_url()?;
        let body = format!(
            "username={}&password={}",
            urlencoding::encode(&credentials.username),
            urlencoding::encode(&credentials.password)
        );

        let request = self.identify(
            TransportRequest::new(url.clone(), body).with_header("Content-Type", FORM_CONTENT_TYPE),
        );

        let response = self.inner.transport.send_request(request).await?;
        self.inner.cookies.absorb(&url, &response.set_cookies);

        if response.status != 200 {
            warn!(status = response.status, username = %credentials.username, "Login rejected");
            return Err(Error::request_failed("Could not log in", response.status));
        }

        info!(username = %credentials.username, "Logged in");
        *self.inner.login.lock() = Some(credentials);
        Ok(())
    }

    /// Schedules a reconnect after the remote forgot our client id.
    ///
    /// At most one reconnect runs at a time.
    fn spawn_reconnect(&self) {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress");
            return;
        }
        tokio::spawn(self.clone().reconnect_task());
    }

    fn reconnect_task(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.reconnect().await {
                error!(error = %e, "Reconnect failed");
            }
            self.inner.reconnecting.store(false, Ordering::SeqCst);
        })
    }
}

// ============================================================================
// Session - Queries
// ============================================================================

impl Session {
    /// Submits a query and registers `callback` for its messages.
    ///
    /// A fresh `requestId` is written into the query before it is sent.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless connected
    /// - [`Error::InvalidArgument`] if `query` is not a JSON object
    /// - the submission frame failure, in which case nothing stays registered
    pub async fn query(&self, query: Value, callback: QueryCallback) -> Result<RequestId> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let Value::Object(mut fields) = query else {
            return Err(Error::invalid_argument("Query must be a JSON object"));
        };

        let request_id = RequestId::generate();
        fields.insert("requestId".into(), json!(request_id));
        let query = Value::Object(fields);

        self.inner
            .registry
            .put(request_id, QueryTracker::new(request_id, query.clone(), callback))?;

        // A disconnect that drained the registry before the put never sees
        // this tracker. One that drained after it delivers the DISCONNECT.
        if !self.is_connected() {
            if self.inner.registry.remove(&request_id).is_some() {
                return Err(Error::NotConnected);
            }
            debug!(%request_id, "Query drained by disconnect before submission");
            return Ok(request_id);
        }

        debug!(%request_id, "Submitting query");

        if let Err(e) = self
            .frame_request(SERVICE_QUERY, "", query_fields(query), false)
            .await
        {
            self.inner.registry.remove(&request_id);
            return Err(e);
        }

        Ok(request_id)
    }

    /// Routes one inbound data-channel payload to its tracker.
    ///
    /// Payloads without a known `requestId` are logged and dropped. The
    /// tracker is unregistered once it reports finished.
    pub fn process_message(&self, data: Value) {
        let message = QueryMessage::new(data);

        let Some(request_id) = message.request_id() else {
            warn!(message_type = %message.message_type(), "Message without request id");
            return;
        };

        let Some(tracker) = self.inner.registry.get(&request_id) else {
            warn!(%request_id, message_type = %message.message_type(), "Message for unknown query");
            return;
        };

        let finished = {
            let mut tracker = tracker.lock();
            if tracker.is_finished() {
                debug!(%request_id, "Message for finished query");
                return;
            }
            tracker.observe(&message);
            tracker.is_finished()
        };

        if finished {
            self.inner.registry.remove(&request_id);
            debug!(%request_id, "Query finished");
        }
    }

    /// Waits until no query is outstanding or the session leaves `Connected`.
    pub async fn join(&self) {
        while self.is_connected() && !self.inner.registry.is_empty() {
            sleep(self.inner.config.join_interval).await;
        }
    }
}

// ============================================================================
// Session - Framing
// ============================================================================

impl Session {
    /// Sends one envelope and processes the reply.
    ///
    /// Data-channel payloads in the reply are queued for dispatch. Returns
    /// `Ok(None)` when the reply was discarded: the session went inactive,
    /// a stale-client reconnect was triggered, or `ignore_failure` swallowed
    /// a failure.
    pub(crate) async fn frame_request(
        &self,
        channel: &str,
        path: &str,
        fields: Map<String, Value>,
        ignore_failure: bool,
    ) -> Result<Option<Vec<InboundEnvelope>>> {
        let envelope = {
            let mut frame = self.inner.frame.lock();
            let id = frame.next_id;
            frame.next_id = id.next();
            OutboundEnvelope::new(channel, id, frame.client_id.clone(), fields)
        };

        let url = self.inner.config.frame_url(path)?;
        let request = self.identify(
            TransportRequest::new(url.clone(), envelope.to_body()?)
                .with_header("Content-Type", JSON_CONTENT_TYPE),
        );

        trace!(channel, id = %envelope.id, "Sending frame");

        let response = match self.inner.transport.send_request(request).await {
            Ok(response) => response,
            Err(e) if ignore_failure => {
                error!(channel, error = %e, "Request failed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.inner.cookies.absorb(&url, &response.set_cookies);

        if !self.state().is_active() {
            trace!(channel, "Discarding response, session inactive");
            return Ok(None);
        }

        if !response.is_success() {
            let err = Error::request_failed(
                format!("Unable to connect for channel {channel}"),
                response.status,
            );
            if ignore_failure {
                error!(channel, status = response.status, "Request rejected");
                return Ok(None);
            }
            return Err(err);
        }

        let envelopes = match InboundEnvelope::parse_body(&response.body) {
            Ok(envelopes) => envelopes,
            Err(e) if ignore_failure => {
                error!(channel, error = %e, "Unreadable response");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        for envelope in &envelopes {
            if envelope.is_unsuccessful() {
                let state = self.state();
                if !state.is_active() {
                    continue;
                }

                if envelope.is_unknown_client() && state == SessionState::Connected {
                    error!(channel, "Client id no longer recognised, reconnecting");
                    self.spawn_reconnect();
                    return Ok(None);
                }

                let reason = envelope.failure_reason();
                if !ignore_failure {
                    return Err(Error::protocol(reason));
                }
                error!(channel, %reason, "Ignoring unsuccessful envelope");
            }

            if !envelope.is_on(&self.inner.config.data_channel) {
                continue;
            }

            if let Some(data) = &envelope.data {
                self.enqueue(data.clone());
            }
        }

        Ok(Some(envelopes))
    }

    fn enqueue(&self, data: Value) {
        match self.inner.inbound.lock().as_ref() {
            Some(sender) => {
                if sender.send(data).is_err() {
                    debug!("Dispatch loop gone, message dropped");
                }
            }
            None => debug!("No inbound queue, message dropped"),
        }
    }

    /// Adds the client identity headers and any stored cookies.
    fn identify(&self, request: TransportRequest) -> TransportRequest {
        let config = &self.inner.config;
        let cookies = self.inner.cookies.cookies_for(&request.url);

        let request = request
            .with_header(CLIENT_NAME_HEADER, config.client_name.as_str())
            .with_header(CLIENT_VERSION_HEADER, config.client_version.as_str());

        match cookies {
            Some(cookies) => request.with_header("Cookie", cookies),
            None => request,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::protocol::MessageType;
    use crate::protocol::channel::DEFAULT_DATA_CHANNEL;
    use crate::session::options::ApiKey;
    use crate::transport::TransportResponse;
    use crate::transport::mock::MockTransport;

    fn test_config() -> SessionConfig {
        SessionConfig::new()
            .with_join_interval(Duration::from_millis(5))
            .with_poll_error_backoff(Duration::from_millis(5))
    }

    async fn connected_session() -> (Session, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport.clone());
        session.connect().await.expect("connect");
        (session, transport)
    }

    fn collector() -> (QueryCallback, Arc<Mutex<Vec<QueryMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: QueryCallback = Box::new(move |_, message| {
            sink.lock().push(message.clone());
        });
        (callback, seen)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn types(seen: &Mutex<Vec<QueryMessage>>) -> Vec<String> {
        seen.lock()
            .iter()
            .map(|message| message.message_type().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_connect_handshakes_and_subscribes() {
        let (session, transport) = connected_session().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.client_id(), Some(ClientId::new("client-1")));

        let handshake = &transport.envelopes_on(META_HANDSHAKE)[0];
        assert_eq!(handshake["version"], "1.0");
        assert_eq!(handshake["advice"]["timeout"], 60_000);
        assert!(handshake.get("clientId").is_none());

        let subscribe = &transport.envelopes_on(META_SUBSCRIBE)[0];
        assert_eq!(subscribe["subscription"], DEFAULT_DATA_CHANNEL);
        assert_eq!(subscribe["clientId"], "client-1");
        assert_eq!(subscribe["connectionType"], "long-polling");

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_message_ids_strictly_increase() {
        let (session, transport) = connected_session().await;
        wait_until(|| !transport.envelopes_on(META_CONNECT).is_empty()).await;
        session.disconnect().await;

        let ids: Vec<u64> = transport
            .requests()
            .iter()
            .filter_map(|request| serde_json::from_str::<Value>(&request.body).ok())
            .filter_map(|body| body[0]["id"].as_u64())
            .collect();

        assert!(ids.len() >= 4);
        assert_eq!(ids[0], 1);
        assert_eq!(ids[1], 2);
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len(), "message ids must be unique");
    }

    #[tokio::test]
    async fn test_message_ids_increase_across_concurrent_frames() {
        let (session, transport) = connected_session().await;
        wait_until(|| !transport.envelopes_on(META_CONNECT).is_empty()).await;

        let queries = (0..8).map(|n| {
            let session = session.clone();
            let (callback, _) = collector();
            async move { session.query(json!({ "n": n }), callback).await }
        });
        for result in futures_util::future::join_all(queries).await {
            result.expect("query");
        }
        session.disconnect().await;

        let ids: Vec<u64> = transport
            .requests()
            .iter()
            .filter_map(|request| serde_json::from_str::<Value>(&request.body).ok())
            .filter_map(|body| body[0]["id"].as_u64())
            .collect();

        assert_eq!(transport.envelopes_on(SERVICE_QUERY).len(), 8);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "ids out of order: {ids:?}");
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&(ids.len() as u64)), "ids skipped: {ids:?}");
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (session, transport) = connected_session().await;
        session.connect().await.expect("second connect");

        assert_eq!(transport.handshake_count(), 1);
        assert_eq!(session.client_id(), Some(ClientId::new("client-1")));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_handshake_without_client_id_fails() {
        let transport = MockTransport::new();
        transport.script_envelopes(
            META_HANDSHAKE,
            json!([{ "channel": META_HANDSHAKE, "successful": true }]),
        );
        let session = Session::new(test_config(), transport.clone());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.client_id().is_none());

        session.connect().await.expect("retry succeeds");
        assert!(session.is_connected());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_rejected_subscribe_fails_connect() {
        let transport = MockTransport::new();
        transport.script(META_SUBSCRIBE, TransportResponse::new(500, ""));
        let session = Session::new(test_config(), transport.clone());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::RequestFailed { status: 500, .. }));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unsuccessful_handshake_is_protocol_error() {
        let transport = MockTransport::new();
        transport.script_envelopes(
            META_HANDSHAKE,
            json!([{ "channel": META_HANDSHAKE, "successful": false, "error": "403::Forbidden" }]),
        );
        let session = Session::new(test_config(), transport.clone());

        let err = session.connect().await.unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("403::Forbidden"));
        assert_eq!(transport.handshake_count(), 1);
    }

    #[tokio::test]
    async fn test_query_routes_messages_until_finished() {
        let (session, transport) = connected_session().await;
        let (callback, seen) = collector();

        let request_id = session
            .query(json!({ "connectorGuids": ["abc"], "input": { "webpage/url": "x" } }), callback)
            .await
            .expect("query");
        assert_eq!(session.outstanding(), 1);

        let submitted = &transport.envelopes_on(SERVICE_QUERY)[0];
        assert_eq!(submitted["data"]["requestId"], request_id.to_string());
        assert_eq!(submitted["data"]["connectorGuids"][0], "abc");

        transport.push_messages(vec![
            json!({ "type": "INIT", "requestId": request_id }),
            json!({ "type": "MESSAGE", "requestId": request_id, "data": { "results": [] } }),
            json!({ "type": "STOP", "requestId": request_id }),
        ]);

        wait_until(|| session.outstanding() == 0).await;
        assert_eq!(types(&seen), vec!["INIT", "MESSAGE", "STOP"]);
        assert!(seen.lock().iter().all(|m| m.request_id() == Some(request_id)));

        session.disconnect().await;
        assert_eq!(seen.lock().len(), 3, "finished query gets no DISCONNECT");
    }

    #[tokio::test]
    async fn test_other_channels_never_reach_trackers() {
        let (session, transport) = connected_session().await;
        let (callback, seen) = collector();
        let request_id = session.query(json!({}), callback).await.expect("query");

        transport.push_envelopes(vec![
            json!({ "channel": "/other", "data": { "type": "STOP", "requestId": request_id } }),
            json!({ "channel": DEFAULT_DATA_CHANNEL, "data": { "type": "INIT", "requestId": request_id } }),
        ]);

        wait_until(|| !seen.lock().is_empty()).await;
        assert_eq!(types(&seen), vec!["INIT"]);
        assert_eq!(session.outstanding(), 1);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_error_message_finishes_query() {
        let (session, transport) = connected_session().await;
        let (callback, seen) = collector();
        let request_id = session.query(json!({}), callback).await.expect("query");

        transport.push_messages(vec![json!({
            "type": "ERROR",
            "requestId": request_id,
            "data": { "errorType": "ConnectorFailed", "status": 500 }
        })]);

        wait_until(|| session.outstanding() == 0).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].clone().into_result().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_each_pending_query_once() {
        let (session, transport) = connected_session().await;

        let mut collectors = Vec::new();
        for _ in 0..3 {
            let (callback, seen) = collector();
            let id = session.query(json!({}), callback).await.expect("query");
            collectors.push((id, seen));
        }
        let (first_id, first_seen) = &collectors[0];
        transport.push_messages(vec![json!({ "type": "START", "requestId": first_id })]);
        wait_until(|| !first_seen.lock().is_empty()).await;

        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.client_id().is_none());
        assert_eq!(session.outstanding(), 0);
        assert_eq!(transport.envelopes_on(META_DISCONNECT).len(), 1);

        for (id, seen) in &collectors {
            let seen = seen.lock();
            let disconnects: Vec<_> = seen
                .iter()
                .filter(|m| *m.message_type() == MessageType::Disconnect)
                .collect();
            assert_eq!(disconnects.len(), 1);
            assert_eq!(disconnects[0].request_id(), Some(*id));
            assert_eq!(seen.last().map(QueryMessage::message_type), Some(&MessageType::Disconnect));
        }
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport.clone());

        session.disconnect().await;
        assert!(transport.requests().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    async fn assert_failed_disconnect_cleans_up(break_disconnect: impl FnOnce(&MockTransport)) {
        let (session, transport) = connected_session().await;

        let mut collectors = Vec::new();
        for _ in 0..2 {
            let (callback, seen) = collector();
            session.query(json!({}), callback).await.expect("query");
            collectors.push(seen);
        }

        break_disconnect(&transport);
        session.disconnect().await;

        assert_eq!(transport.envelopes_on(META_DISCONNECT).len(), 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.client_id().is_none());
        assert!(session.registry().is_empty());
        for seen in &collectors {
            assert_eq!(types(seen), vec!["DISCONNECT"]);
        }
    }

    #[tokio::test]
    async fn test_rejected_disconnect_request_still_cleans_up() {
        assert_failed_disconnect_cleans_up(|transport| {
            transport.script(META_DISCONNECT, TransportResponse::new(500, ""));
        })
        .await;
    }

    #[tokio::test]
    async fn test_dropped_disconnect_request_still_cleans_up() {
        assert_failed_disconnect_cleans_up(|transport| transport.fail(META_DISCONNECT)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_query_racing_disconnect_has_single_outcome() {
        let (session, _transport) = connected_session().await;

        let mut submissions = Vec::new();
        for n in 0..16 {
            let (callback, seen) = collector();
            let session = session.clone();
            let handle =
                tokio::spawn(async move { session.query(json!({ "n": n }), callback).await });
            submissions.push((handle, seen));
        }
        session.disconnect().await;

        for (handle, seen) in submissions {
            match handle.await.expect("query task") {
                Ok(_) => assert_eq!(types(&seen), vec!["DISCONNECT"]),
                Err(e) => {
                    assert!(matches!(e, Error::NotConnected), "unexpected error {e}");
                    assert!(seen.lock().is_empty());
                }
            }
        }
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_query_requires_connection() {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport.clone());
        let (callback, _) = collector();

        let err = session.query(json!({}), callback).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_query_must_be_object() {
        let (session, _transport) = connected_session().await;
        let (callback, _) = collector();

        let err = session.query(json!(["not", "an", "object"]), callback).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(session.outstanding(), 0);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_rejected_query_is_unregistered() {
        let (session, transport) = connected_session().await;
        transport.script_envelopes(
            SERVICE_QUERY,
            json!([{ "channel": SERVICE_QUERY, "successful": false, "error": "403::Forbidden" }]),
        );
        let (callback, seen) = collector();

        let err = session.query(json!({}), callback).await.unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(session.outstanding(), 0);
        assert!(seen.lock().is_empty());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_dropped() {
        let (session, _transport) = connected_session().await;
        let (callback, seen) = collector();
        session.query(json!({}), callback).await.expect("query");

        session.process_message(json!({ "type": "STOP", "requestId": RequestId::generate() }));
        session.process_message(json!({ "type": "STOP" }));
        session.process_message(json!({ "type": "STOP", "requestId": "not-a-uuid" }));

        assert_eq!(session.outstanding(), 1);
        assert!(seen.lock().is_empty());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_unknown_client_triggers_reconnect() {
        let (session, transport) = connected_session().await;
        let (callback, seen) = collector();
        session.query(json!({}), callback).await.expect("query");

        transport.script_envelopes(
            META_CONNECT,
            json!([{ "channel": META_CONNECT, "successful": false, "error": "402::Unknown client" }]),
        );

        wait_until(|| transport.handshake_count() == 2 && session.is_connected()).await;
        assert_eq!(session.client_id(), Some(ClientId::new("client-2")));
        assert_eq!(types(&seen), vec!["DISCONNECT"]);
        assert_eq!(transport.envelopes_on(META_SUBSCRIBE).len(), 2);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_hook_runs_after_every_connect() {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport.clone());

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let hook: ConnectHook = Arc::new(move |session: Session| -> BoxFuture<'static, Result<()>> {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                assert!(session.is_connected());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        session.set_connect_hook(hook);

        session.connect().await.expect("connect");
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        transport.script_envelopes(
            META_CONNECT,
            json!([{ "channel": META_CONNECT, "successful": false, "error": "402::Unknown client" }]),
        );
        wait_until(|| runs.load(Ordering::SeqCst) == 2).await;
        assert_eq!(transport.handshake_count(), 2);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_hook_failure_leaves_session_connected() {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport);
        session.set_connect_hook(Arc::new(|_: Session| -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Err(Error::NotConnected) })
        }));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(session.is_connected());

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_polling() {
        let (session, transport) = connected_session().await;
        transport.script(META_CONNECT, TransportResponse::new(503, ""));

        let before = transport.envelopes_on(META_CONNECT).len();
        wait_until(|| transport.envelopes_on(META_CONNECT).len() >= before + 3).await;
        assert!(session.is_connected());
        assert_eq!(transport.handshake_count(), 1);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_api_key_added_to_every_frame() {
        let transport = MockTransport::new();
        let config = test_config().with_api_key(ApiKey::new("user-1", "secret"));
        let session = Session::new(config, transport.clone());
        session.connect().await.expect("connect");
        session.disconnect().await;

        for request in transport.requests() {
            let query = request.url.query().unwrap_or_default();
            assert!(query.contains("_user=user-1"), "missing user in {query}");
            assert!(query.contains("_apikey=secret"), "missing key in {query}");
        }
    }

    #[tokio::test]
    async fn test_frames_carry_client_identity() {
        let (session, transport) = connected_session().await;
        session.disconnect().await;

        let request = &transport.requests()[0];
        assert_eq!(request.header("content-type"), Some(JSON_CONTENT_TYPE));
        assert!(request.header(CLIENT_NAME_HEADER).is_some());
        assert!(request.header(CLIENT_VERSION_HEADER).is_some());
    }

    #[tokio::test]
    async fn test_login_cookie_sent_on_frames() {
        let transport = MockTransport::new();
        let mut response = TransportResponse::new(200, "");
        response
            .set_cookies
            .push("AUTH=token; Domain=.import.io; Path=/".to_string());
        transport.script("", response);

        let session = Session::new(test_config(), transport.clone());
        session
            .login(LoginCredentials::new("me@example.com", "p&ss word"))
            .await
            .expect("login");

        let login = &transport.requests()[0];
        assert_eq!(login.url.path(), "/auth/login");
        assert_eq!(login.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(login.body, "username=me%40example.com&password=p%26ss%20word");

        session.connect().await.expect("connect");
        let handshake = transport
            .requests()
            .into_iter()
            .find(|request| request.url.path().ends_with("/handshake"))
            .expect("handshake sent");
        assert_eq!(handshake.header("cookie"), Some("AUTH=token"));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let transport = MockTransport::new();
        transport.script("", TransportResponse::new(401, "denied"));
        let session = Session::new(test_config(), transport.clone());

        let err = session
            .login(LoginCredentials::new("me", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestFailed { status: 401, .. }));
        assert_eq!(err.to_string(), "Could not log in (code: 401)");
    }

    #[tokio::test]
    async fn test_join_returns_when_queries_finish() {
        let (session, transport) = connected_session().await;
        let (callback, _) = collector();
        let request_id = session.query(json!({}), callback).await.expect("query");

        let joiner = tokio::spawn({
            let session = session.clone();
            async move { session.join().await }
        });

        sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished());

        transport.push_messages(vec![json!({ "type": "CANCEL", "requestId": request_id })]);
        timeout(Duration::from_secs(5), joiner)
            .await
            .expect("join returned")
            .expect("join task");

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_join_returns_immediately_when_idle() {
        let transport = MockTransport::new();
        let session = Session::new(test_config(), transport);
        timeout(Duration::from_millis(100), session.join())
            .await
            .expect("join on idle session");
    }
}
