// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the broker and backend, builders,
//! and assertion helpers.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use crate::api::{self, ChatApi};
use crate::credential::Credential;
use crate::error::{ChatError, TransportError};
use crate::model::{ChatMessage, Id, PresenceUser, RoomId};
use crate::transport::{
    ChannelAuthorizer, ConnectionState, Dialer, Link, LinkPeer, Realtime, StateChange,
    TransportSettings,
};

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

pub fn credential(token: &str) -> anyhow::Result<Credential> {
    Credential::new(token).ok_or_else(|| anyhow::anyhow!("blank token"))
}

pub fn message(id: &str, secs: i64, body: &str) -> ChatMessage {
    ChatMessage {
        id: Id::from(id),
        room_id: None,
        author_id: Id::from("u1"),
        author_name: "Ada".into(),
        body: body.into(),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default(),
    }
}

pub fn user(id: &str) -> PresenceUser {
    PresenceUser { user_id: Id::from(id), display_name: format!("name-{id}") }
}

pub fn test_settings() -> TransportSettings {
    TransportSettings {
        url: "ws://broker.test/app/key?protocol=7".into(),
        reconnect_delay: Duration::from_secs(3),
        reconnect_max_delay: Duration::from_secs(30),
        reconnect_attempts: 5,
        handshake_timeout: Duration::from_secs(1),
        activity_timeout: Duration::from_secs(120),
        pong_timeout: Duration::from_secs(30),
    }
}

// -- broker ---------------------------------------------------------------------

pub fn established_frame(socket_id: &str) -> String {
    let data = json!({ "socket_id": socket_id, "activity_timeout": 120 }).to_string();
    json!({ "event": "pusher:connection_established", "data": data }).to_string()
}

/// A server push on `channel`, with `data` JSON-encoded the way brokers send it.
pub fn channel_frame(channel: &str, event: &str, data: Value) -> String {
    json!({ "event": event, "channel": channel, "data": data.to_string() }).to_string()
}

/// How the next dial attempt behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPlan {
    /// Accept and complete the handshake.
    Accept,
    /// Fail like an unreachable host.
    Refuse,
    /// Fail the upgrade with 401.
    Reject,
}

/// In-process broker. Accepted links are handed to the test as [`LinkPeer`]s.
pub struct MockDialer {
    default: DialPlan,
    plans: Mutex<VecDeque<DialPlan>>,
    dials: AtomicUsize,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl MockDialer {
    pub fn new(default: DialPlan) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            default,
            plans: Mutex::new(VecDeque::new()),
            dials: AtomicUsize::new(0),
            peers: tx,
        };
        (Arc::new(dialer), rx)
    }

    /// Queue a one-off plan ahead of the default.
    pub fn then(&self, plan: DialPlan) {
        self.plans.lock().push_back(plan);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Dialer for MockDialer {
    fn dial(&self, _url: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().pop_front().unwrap_or(self.default);
        let result = match plan {
            DialPlan::Refuse => Err(TransportError::Connect("connection refused".into())),
            DialPlan::Reject => {
                Err(TransportError::Unauthorized("handshake rejected (401)".into()))
            }
            DialPlan::Accept => {
                let (link, peer) = Link::pair();
                let _ = peer.to_client.send(established_frame("1.1"));
                let _ = self.peers.send(peer);
                Ok(link)
            }
        };
        Box::pin(async move { result })
    }
}

/// Signs every channel unless told to reject.
#[derive(Default)]
pub struct MockAuthorizer {
    pub reject: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl ChannelAuthorizer for MockAuthorizer {
    fn authorize(
        &self,
        _credential: &Credential,
        _socket_id: &str,
        channel: &str,
    ) -> BoxFuture<'static, Result<String, TransportError>> {
        self.calls.lock().push(channel.to_owned());
        let result = if self.reject.load(Ordering::SeqCst) {
            Err(TransportError::Unauthorized("channel auth returned 403".into()))
        } else {
            Ok(format!("key:{channel}"))
        };
        Box::pin(async move { result })
    }
}

pub struct Broker {
    pub realtime: Realtime,
    pub dialer: Arc<MockDialer>,
    pub authorizer: Arc<MockAuthorizer>,
    pub peers: mpsc::UnboundedReceiver<LinkPeer>,
}

pub fn broker(default: DialPlan) -> Broker {
    let (dialer, peers) = MockDialer::new(default);
    let authorizer = Arc::new(MockAuthorizer::default());
    let realtime = Realtime::new(test_settings(), dialer.clone(), authorizer.clone());
    Broker { realtime, dialer, authorizer, peers }
}

/// Forward every state change into a channel the test can await.
pub fn record_states(realtime: &Realtime) -> mpsc::UnboundedReceiver<StateChange> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _handle = realtime.on_state_change(move |change| {
        let _ = tx.send(change.clone());
    });
    rx
}

/// Wait until a change into `state` arrives, returning everything seen on the way.
pub async fn until_state(
    rx: &mut mpsc::UnboundedReceiver<StateChange>,
    state: ConnectionState,
) -> anyhow::Result<Vec<StateChange>> {
    let mut seen = Vec::new();
    loop {
        let change = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("state channel closed"))?;
        let done = change.current == state;
        seen.push(change);
        if done {
            return Ok(seen);
        }
    }
}

/// Next frame the client sent, parsed.
pub async fn next_sent(peer: &mut LinkPeer) -> anyhow::Result<Value> {
    let text = tokio::time::timeout(Duration::from_secs(5), peer.from_client.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("client link closed"))?;
    Ok(serde_json::from_str(&text)?)
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<LinkPeer>) -> anyhow::Result<LinkPeer> {
    tokio::time::timeout(Duration::from_secs(5), peers.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("dialer gone"))
}

// -- backend --------------------------------------------------------------------

/// Scriptable [`ChatApi`] that records every call by endpoint path.
pub struct FakeApi {
    pub calls: Mutex<Vec<&'static str>>,
    pub room: Mutex<RoomId>,
    pub history: Mutex<Vec<ChatMessage>>,
    pub users: Mutex<Vec<PresenceUser>>,
    /// When set, `join` waits for a permit before answering.
    pub join_gate: Mutex<Option<Arc<Notify>>>,
    /// When set, `messages` waits for a permit before answering.
    pub history_gate: Mutex<Option<Arc<Notify>>>,
    /// Bodies passed to `send_message`, verbatim.
    pub sent: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<&'static str>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            room: Mutex::new(Id::from("1")),
            history: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            join_gate: Mutex::new(None),
            history_gate: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == endpoint).count()
    }

    pub fn fail(&self, endpoint: &'static str) {
        self.failing.lock().insert(endpoint);
    }

    fn record(&self, endpoint: &'static str) -> Result<(), ChatError> {
        self.calls.lock().push(endpoint);
        if self.failing.lock().contains(endpoint) {
            return Err(ChatError::Endpoint {
                endpoint,
                status: Some(500),
                message: "server error".into(),
            });
        }
        Ok(())
    }
}

impl ChatApi for Arc<FakeApi> {
    async fn join(&self, _credential: &Credential) -> Result<RoomId, ChatError> {
        let gate = self.join_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record(api::JOIN)?;
        Ok(self.room.lock().clone())
    }

    async fn leave(&self, _credential: &Credential) -> Result<(), ChatError> {
        self.record(api::LEAVE)
    }

    async fn send_message(&self, _credential: &Credential, text: &str) -> Result<(), ChatError> {
        self.record(api::SEND_MESSAGE)?;
        self.sent.lock().push(text.to_owned());
        Ok(())
    }

    async fn messages(&self, _credential: &Credential) -> Result<Vec<ChatMessage>, ChatError> {
        let gate = self.history_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record(api::MESSAGES)?;
        Ok(self.history.lock().clone())
    }

    async fn online_users(&self, _credential: &Credential) -> Result<Vec<PresenceUser>, ChatError> {
        self.record(api::ONLINE_USERS)?;
        Ok(self.users.lock().clone())
    }

    async fn update_status(&self, _credential: &Credential) -> Result<(), ChatError> {
        self.record(api::UPDATE_STATUS)
    }
}
