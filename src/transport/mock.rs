//! Scripted in-memory transport for tests.
//!
//! Answers every meta channel the way a Bayeux server would, holds long-polls
//! briefly until a test injects inbound envelopes, and lets tests queue
//! one-shot replies per channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::error::{Error, Result};
use crate::protocol::channel::{DEFAULT_DATA_CHANNEL, META_CONNECT, META_HANDSHAKE};

use super::{Transport, TransportRequest, TransportResponse};

/// How long an idle long-poll is held before returning empty.
const POLL_HOLD: Duration = Duration::from_millis(20);

pub(crate) struct MockTransport {
    requests: Mutex<Vec<TransportRequest>>,
    scripted: Mutex<VecDeque<(String, Result<TransportResponse>)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    poll_tx: mpsc::UnboundedSender<Vec<Value>>,
    poll_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<Value>>>,
    handshakes: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            delays: Mutex::new(Vec::new()),
            poll_tx,
            poll_rx: tokio::sync::Mutex::new(poll_rx),
            handshakes: AtomicUsize::new(0),
        })
    }

    /// Delivers raw envelopes on the next long-poll.
    pub(crate) fn push_envelopes(&self, envelopes: Vec<Value>) {
        let _ = self.poll_tx.send(envelopes);
    }

    /// Delivers message payloads on the data channel on the next long-poll.
    pub(crate) fn push_messages(&self, messages: Vec<Value>) {
        self.push_envelopes(
            messages
                .into_iter()
                .map(|data| json!({ "channel": DEFAULT_DATA_CHANNEL, "data": data }))
                .collect(),
        );
    }

    /// Answers the next request on `channel` with `response`.
    pub(crate) fn script(&self, channel: &str, response: TransportResponse) {
        self.scripted
            .lock()
            .push_back((channel.to_string(), Ok(response)));
    }

    /// Fails the next request on `channel` as if the connection dropped.
    pub(crate) fn fail(&self, channel: &str) {
        self.scripted.lock().push_back((
            channel.to_string(),
            Err(Error::request_failed("Connection reset", 0)),
        ));
    }

    /// Answers the next request on `channel` with the given envelopes.
    pub(crate) fn script_envelopes(&self, channel: &str, envelopes: Value) {
        self.script(channel, TransportResponse::new(200, envelopes.to_string()));
    }

    /// Stalls the next request on `channel` for `delay` before answering.
    pub(crate) fn delay(&self, channel: &str, delay: Duration) {
        self.delays.lock().push((channel.to_string(), delay));
    }

    pub(crate) fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Every recorded request.
    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Outbound envelopes sent on `channel`, in order.
    pub(crate) fn envelopes_on(&self, channel: &str) -> Vec<Value> {
        self.requests()
            .iter()
            .map(|request| envelope_of(request))
            .filter(|envelope| envelope["channel"] == channel)
            .collect()
    }

    fn take_scripted(&self, channel: &str) -> Option<Result<TransportResponse>> {
        let mut scripted = self.scripted.lock();
        let index = scripted.iter().position(|(c, _)| c == channel)?;
        scripted.remove(index).map(|(_, response)| response)
    }

    fn ok(channel: &str, extra: Value) -> Value {
        let mut envelope = json!({ "channel": channel, "successful": true });
        if let (Some(target), Some(extra)) = (envelope.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        envelope
    }
}

fn envelope_of(request: &TransportRequest) -> Value {
    serde_json::from_str::<Value>(&request.body)
        .ok()
        .and_then(|body| body.get(0).cloned())
        .unwrap_or(Value::Null)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.requests.lock().push(request.clone());

        let envelope = envelope_of(&request);
        let channel = envelope["channel"].as_str().unwrap_or_default().to_string();

        if channel == META_HANDSHAKE {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
        }

        let delay = {
            let mut delays = self.delays.lock();
            delays
                .iter()
                .position(|(c, _)| *c == channel)
                .map(|index| delays.remove(index).1)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if let Some(response) = self.take_scripted(&channel) {
            return response;
        }

        let envelopes = match channel.as_str() {
            META_HANDSHAKE => {
                let n = self.handshake_count();
                json!([Self::ok(&channel, json!({ "clientId": format!("client-{n}") }))])
            }
            META_CONNECT => {
                let mut rx = self.poll_rx.lock().await;
                let mut envelopes = vec![Self::ok(&channel, json!({}))];
                if let Ok(Some(batch)) = timeout(POLL_HOLD, rx.recv()).await {
                    envelopes.extend(batch);
                }
                Value::Array(envelopes)
            }
            _ => json!([Self::ok(&channel, json!({}))]),
        };

        Ok(TransportResponse::new(200, envelopes.to_string()))
    }
}
