// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime transport: one authenticated socket to the broker, reconnected
//! with bounded backoff, multiplexing channel subscriptions.

pub mod auth;
pub mod backoff;
mod driver;
pub mod link;
pub mod protocol;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ChatConfig;
use crate::credential::Credential;
use crate::error::TransportError;
use crate::listeners::{ListenerHandle, Listeners};

pub use self::auth::ChannelAuthorizer;
pub use self::backoff::Backoff;
pub use self::link::{Dialer, Link, LinkPeer, WsDialer};
pub use self::protocol::ChannelEvent;

/// Broker keepalive when the server does not announce one.
const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// One-based number of the attempt this retry makes. A fresh connect
    /// counts its opening dial as attempt 1; after a drop the first retry is
    /// attempt 1.
    pub attempt: u32,
    pub delay: Duration,
}

/// Emitted on every state transition. `Reconnecting` is re-announced for
/// each scheduled retry.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub retry: Option<Retry>,
    pub error: Option<TransportError>,
}

/// Identifies one handler registered with [`Realtime::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Timing and retry knobs for the connection driver.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_attempts: u32,
    pub handshake_timeout: Duration,
    pub activity_timeout: Duration,
    pub pong_timeout: Duration,
}

impl TransportSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            url: config.ws_url(),
            reconnect_delay: config.reconnect_delay(),
            reconnect_max_delay: config.reconnect_max_delay(),
            reconnect_attempts: config.reconnect_attempts,
            handshake_timeout: config.request_timeout(),
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            pong_timeout: PONG_TIMEOUT,
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_delay, self.reconnect_max_delay, self.reconnect_attempts)
    }
}

type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct HandlerSlot {
    id: u64,
    active: Arc<AtomicBool>,
    handler: EventHandler,
}

/// Driver instruction: bring the broker's view of a channel in line with the
/// registry (subscribe if handlers exist, unsubscribe if not).
pub(crate) enum Command {
    Sync(String),
}

struct Inner {
    state: ConnectionState,
    last_error: Option<TransportError>,
    /// Bumped on every connect/disconnect; drivers of older generations
    /// can no longer change state or dispatch.
    generation: u64,
    credential: Option<Credential>,
    cancel: Option<CancellationToken>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    channels: IndexMap<String, Vec<HandlerSlot>>,
    next_handler_id: u64,
}

pub(crate) struct Shared {
    settings: TransportSettings,
    dialer: Arc<dyn Dialer>,
    authorizer: Arc<dyn ChannelAuthorizer>,
    inner: Mutex<Inner>,
    state_listeners: Listeners<StateChange>,
}

/// Handle to the realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct Realtime {
    shared: Arc<Shared>,
}

impl Realtime {
    pub fn new(
        settings: TransportSettings,
        dialer: Arc<dyn Dialer>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            last_error: None,
            generation: 0,
            credential: None,
            cancel: None,
            commands: None,
            channels: IndexMap::new(),
            next_handler_id: 0,
        };
        Self {
            shared: Arc::new(Shared {
                settings,
                dialer,
                authorizer,
                inner: Mutex::new(inner),
                state_listeners: Listeners::new(),
            }),
        }
    }

    /// Open the connection with `credential`.
    ///
    /// A no-op while already connecting or connected with the same
    /// credential. A different credential tears the old socket down first.
    /// From `Failed` this starts over with a fresh retry budget. Must be
    /// called within a Tokio runtime.
    pub fn connect(&self, credential: Option<&Credential>) -> Result<(), TransportError> {
        let Some(credential) = credential else {
            return Err(TransportError::CredentialMissing);
        };

        let (generation, cancel, commands, previous) = {
            let mut inner = self.shared.inner.lock();
            let active = matches!(
                inner.state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Reconnecting
            );
            if active && inner.credential.as_ref() == Some(credential) {
                return Ok(());
            }
            if let Some(old) = inner.cancel.take() {
                old.cancel();
            }
            inner.generation += 1;
            inner.credential = Some(credential.clone());
            inner.last_error = None;

            let cancel = CancellationToken::new();
            let (tx, rx) = mpsc::unbounded_channel();
            inner.cancel = Some(cancel.clone());
            inner.commands = Some(tx);
            let previous = std::mem::replace(&mut inner.state, ConnectionState::Connecting);
            (inner.generation, cancel, rx, previous)
        };

        info!(url = %self.shared.settings.url, "realtime connecting");
        self.shared.emit(StateChange {
            previous,
            current: ConnectionState::Connecting,
            retry: None,
            error: None,
        });

        tokio::spawn(driver::run(
            Arc::clone(&self.shared),
            generation,
            credential.clone(),
            cancel,
            commands,
        ));
        Ok(())
    }

    /// Close the socket and drop every channel handler.
    pub fn disconnect(&self) {
        let previous = {
            let mut inner = self.shared.inner.lock();
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
            }
            inner.generation += 1;
            inner.credential = None;
            inner.commands = None;
            for (_, slots) in inner.channels.drain(..) {
                for slot in slots {
                    slot.active.store(false, Ordering::SeqCst);
                }
            }
            std::mem::replace(&mut inner.state, ConnectionState::Disconnected)
        };

        if previous != ConnectionState::Disconnected {
            info!("realtime disconnected");
            self.shared.emit(StateChange {
                previous,
                current: ConnectionState::Disconnected,
                retry: None,
                error: None,
            });
        }
    }

    /// Register `handler` for events on `channel`.
    ///
    /// The broker subscription is shared by every handler on the channel and
    /// is (re)established whenever the socket connects.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut inner = self.shared.inner.lock();
        let id = inner.next_handler_id;
        inner.next_handler_id += 1;

        let slots = inner.channels.entry(channel.to_owned()).or_default();
        let first = slots.is_empty();
        slots.push(HandlerSlot {
            id,
            active: Arc::new(AtomicBool::new(true)),
            handler: Arc::new(handler),
        });

        if first {
            debug!(channel, "channel registered");
            if let Some(ref commands) = inner.commands {
                let _ = commands.send(Command::Sync(channel.to_owned()));
            }
        }
        SubscriptionHandle { id, channel: channel.to_owned() }
    }

    /// Remove one handler. Returns `false` if it was already gone.
    ///
    /// The handler is not invoked for any event dispatched after this returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(slots) = inner.channels.get_mut(&handle.channel) else {
            return false;
        };
        let Some(pos) = slots.iter().position(|s| s.id == handle.id) else {
            return false;
        };
        let slot = slots.remove(pos);
        slot.active.store(false, Ordering::SeqCst);

        if slots.is_empty() {
            inner.channels.shift_remove(&handle.channel);
            debug!(channel = %handle.channel, "channel released");
            if let Some(ref commands) = inner.commands {
                let _ = commands.send(Command::Sync(handle.channel.clone()));
            }
        }
        true
    }

    /// Whether `handle` still refers to a registered handler.
    pub fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool {
        self.shared
            .inner
            .lock()
            .channels
            .get(&handle.channel)
            .is_some_and(|slots| slots.iter().any(|s| s.id == handle.id))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// The error behind the most recent `Failed` or `Reconnecting` state.
    pub fn last_error(&self) -> Option<TransportError> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Channels with at least one registered handler.
    pub fn channels(&self) -> Vec<String> {
        self.shared.inner.lock().channels.keys().cloned().collect()
    }

    pub fn subscription_count(&self, channel: &str) -> usize {
        self.shared.inner.lock().channels.get(channel).map_or(0, Vec::len)
    }

    pub fn on_state_change(
        &self,
        listener: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.state_listeners.add(listener)
    }

    /// Drop every connection-state listener.
    pub fn clear_state_listeners(&self) {
        self.shared.state_listeners.clear();
    }
}

impl Shared {
    fn emit(&self, change: StateChange) {
        self.state_listeners.emit(&change);
    }

    /// Move to `next` on behalf of driver `generation`. Ignored once that
    /// driver has been superseded.
    fn transition(
        &self,
        generation: u64,
        next: ConnectionState,
        retry: Option<Retry>,
        error: Option<TransportError>,
    ) -> bool {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return false;
            }
            if inner.state == next && retry.is_none() {
                return false;
            }
            if error.is_some() {
                inner.last_error = error.clone();
            }
            std::mem::replace(&mut inner.state, next)
        };
        self.emit(StateChange { previous, current: next, retry, error });
        true
    }

    fn fail(&self, generation: u64, err: TransportError) {
        if self.transition(generation, ConnectionState::Failed, None, Some(err.clone())) {
            error!(err = %err, code = err.as_str(), "realtime connection failed");
        }
    }

    fn is_registered(&self, generation: u64, channel: &str) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.channels.contains_key(channel)
    }

    fn registered_channels(&self, generation: u64) -> Vec<String> {
        let inner = self.inner.lock();
        if inner.generation != generation {
            return Vec::new();
        }
        inner.channels.keys().cloned().collect()
    }

    /// Deliver `event` to the channel's handlers, outside the lock.
    fn dispatch(&self, generation: u64, event: &ChannelEvent) {
        let handlers: Vec<(Arc<AtomicBool>, EventHandler)> = {
            let inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            match inner.channels.get(&event.channel) {
                Some(slots) => slots
                    .iter()
                    .map(|s| (Arc::clone(&s.active), Arc::clone(&s.handler)))
                    .collect(),
                None => return,
            }
        };
        for (active, handler) in handlers {
            if active.load(Ordering::SeqCst) {
                handler(event);
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
