// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat session controller.
//!
//! Owns the room lifecycle (join, leave, send), wires realtime room events
//! into the message store and presence tracker, and reacts to credential
//! changes. Every session is explicitly constructed and disposed; there is no
//! process-wide connection.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChatApi, HttpChatApi};
use crate::config::ChatConfig;
use crate::credential::{Credential, CredentialHolder};
use crate::error::{ChatError, MalformedEvent, TransportError};
use crate::listeners::{ListenerHandle, Listeners};
use crate::model::{
    validate_message, ChatMessage, MessageSentPayload, PresencePayload, PresenceUser, RoomId,
};
use crate::presence::{PresenceEvent, PresenceTracker};
use crate::store::MessageStore;
use crate::subscriptions::ChannelSubscriptions;
use crate::transport::{
    ChannelEvent, ConnectionState, Realtime, StateChange, TransportSettings, WsDialer,
};

pub const MESSAGE_SENT: &str = "ChatMessageSent";
pub const USER_JOINED: &str = "UserJoinedChat";
pub const USER_LEFT: &str = "UserLeftChat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(RoomId),
    AlreadyJoined,
    /// Another join is still waiting on the backend.
    Pending,
    /// A `leave()` ran while the join was in flight; nothing was subscribed.
    Superseded,
    /// No credential.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left(RoomId),
    /// A pending join was abandoned.
    Cancelled,
    NotJoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No credential.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining,
    Joined(RoomId),
}

/// Room phase plus an epoch bumped by every join and leave. Async work
/// started under one epoch only commits if the epoch is unchanged.
struct Lifecycle {
    phase: Phase,
    epoch: u64,
}

impl Lifecycle {
    fn joined_at(&self, epoch: u64) -> bool {
        self.epoch == epoch && matches!(self.phase, Phase::Joined(_))
    }
}

/// State reachable from realtime handlers.
///
/// Lock order: `lifecycle`, then `store`, then `presence`. Listeners are
/// always called with no lock held.
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    store: Mutex<MessageStore>,
    presence: Mutex<PresenceTracker>,
    message_listeners: Listeners<ChatMessage>,
    presence_listeners: Listeners<Vec<PresenceUser>>,
}

impl Shared {
    fn on_room_event(&self, room: &RoomId, epoch: u64, event: &ChannelEvent) {
        match event.event.as_str() {
            MESSAGE_SENT => {
                let Some(payload) = decode::<MessageSentPayload>(event) else { return };
                let message = payload.message;
                if message.room_id.as_ref().is_some_and(|r| r != room) {
                    debug!(
                        room = %room,
                        message_room = ?message.room_id,
                        "message for another room dropped"
                    );
                    return;
                }
                let added = {
                    let lifecycle = self.lifecycle.lock();
                    lifecycle.joined_at(epoch) && self.store.lock().ingest(message.clone())
                };
                if added {
                    self.message_listeners.emit(&message);
                }
            }
            USER_JOINED | USER_LEFT => {
                let Some(payload) = decode::<PresencePayload>(event) else { return };
                let push = if event.event == USER_JOINED {
                    PresenceEvent::Joined(payload.user)
                } else {
                    PresenceEvent::Left(payload.user)
                };
                let changed = {
                    let lifecycle = self.lifecycle.lock();
                    lifecycle.joined_at(epoch)
                        && self.presence.lock().apply_push(push, Instant::now())
                };
                if changed {
                    self.emit_presence();
                }
            }
            other => debug!(event = other, "unhandled room event"),
        }
    }

    fn emit_presence(&self) {
        let users = self.presence.lock().users();
        self.presence_listeners.emit(&users);
    }
}

fn decode<T: DeserializeOwned>(event: &ChannelEvent) -> Option<T> {
    match serde_json::from_value(event.data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(err = %MalformedEvent::new(&event.event, e), "dropping room event");
            None
        }
    }
}

/// A user's chat session: one room at a time over one realtime connection.
pub struct ChatSession<A: ChatApi> {
    config: ChatConfig,
    api: A,
    credentials: Arc<CredentialHolder>,
    realtime: Realtime,
    subscriptions: Mutex<ChannelSubscriptions>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl ChatSession<HttpChatApi> {
    /// A session talking to the configured backend over HTTP and WebSocket.
    pub fn http(
        config: ChatConfig,
        credentials: Arc<CredentialHolder>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let api = HttpChatApi::new(&config)?;
        let realtime = Realtime::new(
            TransportSettings::from_config(&config),
            Arc::new(WsDialer),
            Arc::new(api.clone()),
        );
        Ok(Self::new(config, api, credentials, realtime))
    }
}

impl<A: ChatApi> ChatSession<A> {
    pub fn new(
        config: ChatConfig,
        api: A,
        credentials: Arc<CredentialHolder>,
        realtime: Realtime,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(Lifecycle { phase: Phase::Idle, epoch: 0 }),
            store: Mutex::new(MessageStore::new()),
            presence: Mutex::new(PresenceTracker::new(config.heartbeat_interval())),
            message_listeners: Listeners::new(),
            presence_listeners: Listeners::new(),
        });
        Arc::new(Self {
            subscriptions: Mutex::new(ChannelSubscriptions::new(realtime.clone())),
            config,
            api,
            credentials,
            realtime,
            shared,
            shutdown: CancellationToken::new(),
        })
    }

    /// Connect, follow credential changes, and start the heartbeat.
    pub fn start(self: &Arc<Self>) {
        self.watch_credentials();
        self.spawn_heartbeat();
        self.connect();
    }

    /// Open the realtime connection with the current credential. Returns
    /// `false` (and does nothing) when there is none.
    pub fn connect(&self) -> bool {
        match self.realtime.connect(self.credentials.current().as_ref()) {
            Ok(()) => true,
            Err(e) => {
                debug!(err = %e, "connect skipped");
                false
            }
        }
    }

    pub async fn join(&self) -> Result<JoinOutcome, ChatError> {
        let Some(credential) = self.credentials.current() else {
            debug!("join skipped: no credential");
            return Ok(JoinOutcome::Skipped);
        };

        let epoch = {
            let mut lifecycle = self.shared.lifecycle.lock();
            match lifecycle.phase {
                Phase::Joined(_) => return Ok(JoinOutcome::AlreadyJoined),
                Phase::Joining => return Ok(JoinOutcome::Pending),
                Phase::Idle => {}
            }
            lifecycle.epoch += 1;
            lifecycle.phase = Phase::Joining;
            lifecycle.epoch
        };

        let room = match self.api.join(&credential).await {
            Ok(room) => room,
            Err(e) => {
                let mut lifecycle = self.shared.lifecycle.lock();
                if lifecycle.epoch == epoch {
                    lifecycle.phase = Phase::Idle;
                }
                warn!(err = %e, "join failed");
                return Err(e);
            }
        };

        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.epoch != epoch || lifecycle.phase != Phase::Joining {
                info!(room = %room, "join superseded by leave");
                return Ok(JoinOutcome::Superseded);
            }

            let shared = Arc::clone(&self.shared);
            let handler_room = room.clone();
            self.subscriptions.lock().join_channel(&room, move |event| {
                shared.on_room_event(&handler_room, epoch, event);
            });
            if self.shared.store.lock().bind_room(&room) {
                debug!(room = %room, "message log reset for new room");
            }
            lifecycle.phase = Phase::Joined(room.clone());
        }
        info!(room = %room, "joined chat");

        self.load_history(&credential, epoch).await;
        self.refresh_presence(&credential, epoch).await;
        Ok(JoinOutcome::Joined(room))
    }

    /// Leave the active room.
    ///
    /// Local teardown (unsubscribe, clear presence) happens before this
    /// first awaits. The leave endpoint is then called best-effort, and only
    /// while a credential is held.
    pub async fn leave(&self) -> LeaveOutcome {
        let (outcome, presence_changed) = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let outcome = match std::mem::replace(&mut lifecycle.phase, Phase::Idle) {
                Phase::Idle => return LeaveOutcome::NotJoined,
                Phase::Joining => LeaveOutcome::Cancelled,
                Phase::Joined(room) => {
                    self.subscriptions.lock().leave_channel(&room);
                    LeaveOutcome::Left(room)
                }
            };
            lifecycle.epoch += 1;
            (outcome, self.shared.presence.lock().clear())
        };
        if presence_changed {
            self.shared.emit_presence();
        }

        if let Some(credential) = self.credentials.current() {
            if let Err(e) = self.api.leave(&credential).await {
                warn!(err = %e, "leave endpoint failed");
            }
        }
        match &outcome {
            LeaveOutcome::Left(room) => info!(room = %room, "left chat"),
            _ => info!("pending join abandoned"),
        }
        outcome
    }

    /// Post a message to the active room.
    ///
    /// Nothing is added locally; the message shows up through its broadcast.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let Some(credential) = self.credentials.current() else {
            debug!("send skipped: no credential");
            return Ok(SendOutcome::Skipped);
        };
        validate_message(text, self.config.max_message_length)?;
        if !self.has_joined() {
            return Err(ChatError::NotJoined);
        }

        self.api.send_message(&credential, text).await?;
        Ok(SendOutcome::Sent)
    }

    /// Refresh our online status, reconcile presence against a fresh
    /// snapshot, and drop entries nobody has confirmed recently.
    pub async fn tick(&self) {
        let Some(credential) = self.credentials.current() else { return };
        let Some(epoch) = self.joined_epoch() else { return };

        if let Err(e) = self.api.update_status(&credential).await {
            warn!(err = %e, "status update failed");
        }
        self.refresh_presence(&credential, epoch).await;

        let stale_after = self.config.presence_stale_after();
        let expired = {
            let lifecycle = self.shared.lifecycle.lock();
            lifecycle.joined_at(epoch)
                && self.shared.presence.lock().expire(Instant::now(), stale_after)
        };
        if expired {
            debug!("stale presence entries evicted");
            self.shared.emit_presence();
        }
    }

    /// Run [`tick`](Self::tick) every heartbeat interval until disposed.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let Some(session) = weak.upgrade() else { break };
                session.tick().await;
            }
            debug!("heartbeat stopped");
        });
    }

    /// React to login, logout, and token changes made through the holder.
    pub fn watch_credentials(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let mut rx = self.credentials.subscribe();

        tokio::spawn(async move {
            let mut current = rx.borrow_and_update().clone();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let next = rx.borrow_and_update().clone();
                let Some(session) = weak.upgrade() else { break };
                session.credential_changed(current.as_ref(), next.as_ref()).await;
                current = next;
            }
        });
    }

    async fn credential_changed(&self, previous: Option<&Credential>, next: Option<&Credential>) {
        match (previous, next) {
            (_, None) => {
                info!("credential lost, leaving chat");
                self.leave().await;
                self.realtime.disconnect();
            }
            (None, Some(credential)) => {
                info!("credential available, connecting");
                self.connect_with(credential);
            }
            (Some(_), Some(credential)) => {
                info!("credential changed, reconnecting");
                self.connect_with(credential);
            }
        }
    }

    fn connect_with(&self, credential: &Credential) {
        if let Err(e) = self.realtime.connect(Some(credential)) {
            warn!(err = %e, "realtime connect failed");
        }
    }

    async fn load_history(&self, credential: &Credential, epoch: u64) {
        let history = match self.api.messages(credential).await {
            Ok(history) => history,
            Err(e) => {
                warn!(err = %e, "history load failed");
                return;
            }
        };
        let added = {
            let lifecycle = self.shared.lifecycle.lock();
            if !lifecycle.joined_at(epoch) {
                return;
            }
            self.shared.store.lock().ingest_batch(history)
        };
        debug!(count = added.len(), "history loaded");
        for message in &added {
            self.shared.message_listeners.emit(message);
        }
    }

    async fn refresh_presence(&self, credential: &Credential, epoch: u64) {
        let requested_at = Instant::now();
        let users = match self.api.online_users(credential).await {
            Ok(users) => users,
            Err(e) => {
                warn!(err = %e, "presence snapshot failed");
                return;
            }
        };
        let changed = {
            let lifecycle = self.shared.lifecycle.lock();
            lifecycle.joined_at(epoch)
                && self.shared.presence.lock().apply_snapshot(users, requested_at)
        };
        if changed {
            self.shared.emit_presence();
        }
    }

    fn joined_epoch(&self) -> Option<u64> {
        let lifecycle = self.shared.lifecycle.lock();
        matches!(lifecycle.phase, Phase::Joined(_)).then_some(lifecycle.epoch)
    }

    pub fn has_joined(&self) -> bool {
        matches!(self.shared.lifecycle.lock().phase, Phase::Joined(_))
    }

    pub fn active_room(&self) -> Option<RoomId> {
        match &self.shared.lifecycle.lock().phase {
            Phase::Joined(room) => Some(room.clone()),
            _ => None,
        }
    }

    /// The message log, ordered by `(created_at, arrival)`.
    pub fn messages(&self) -> Arc<[ChatMessage]> {
        self.shared.store.lock().snapshot()
    }

    pub fn online_users(&self) -> Vec<PresenceUser> {
        self.shared.presence.lock().users()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    pub fn last_transport_error(&self) -> Option<TransportError> {
        self.realtime.last_error()
    }

    /// Called once per message newly added to the log, history included.
    pub fn on_message(
        &self,
        listener: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.message_listeners.add(listener)
    }

    /// Called with the full online list whenever membership changes.
    pub fn on_presence_change(
        &self,
        listener: impl Fn(&Vec<PresenceUser>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.presence_listeners.add(listener)
    }

    pub fn on_connection_state_change(
        &self,
        listener: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.realtime.on_state_change(listener)
    }

    /// Leave, disconnect, stop background tasks, and drop all listeners.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        self.leave().await;
        self.subscriptions.lock().leave_all();
        self.realtime.disconnect();
        // After disconnect, so the final Disconnected change still reaches them.
        self.realtime.clear_state_listeners();
        self.shared.message_listeners.clear();
        self.shared.presence_listeners.clear();
        info!("chat session disposed");
    }
}

impl<A: ChatApi> Drop for ChatSession<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
