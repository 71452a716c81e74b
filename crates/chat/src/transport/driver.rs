// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection driver: dial, handshake, resubscribe, pump frames, retry.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::protocol::{self, ServerFrame};
use super::{Backoff, Command, ConnectionState, Link, Retry, Shared};
use crate::credential::Credential;
use crate::error::TransportError;

/// Drive one connection generation until it is cancelled or fails for good.
pub(super) async fn run(
    shared: Arc<Shared>,
    generation: u64,
    credential: Credential,
    cancel: CancellationToken,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut backoff = shared.settings.backoff();
    // The opening dial is the first attempt of the budget.
    backoff.charge();

    loop {
        let err = tokio::select! {
            _ = cancel.cancelled() => return,
            ended = pump(&shared, generation, &credential, &mut backoff, &mut commands) => {
                match ended {
                    Ok(never) => match never {},
                    Err(e) => e,
                }
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        if !err.is_retryable() {
            shared.fail(generation, err);
            return;
        }
        let Some(delay) = backoff.next_delay() else {
            warn!(attempts = backoff.max_attempts(), "reconnect attempts exhausted");
            shared.fail(generation, err);
            return;
        };

        let attempt = backoff.attempt();
        warn!(
            err = %err,
            attempt,
            max_attempts = backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "realtime connection lost, retrying"
        );
        let retry = Some(Retry { attempt, delay });
        if !shared.transition(generation, ConnectionState::Reconnecting, retry, Some(err)) {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One socket lifetime. Only returns once the socket is unusable.
async fn pump(
    shared: &Shared,
    generation: u64,
    credential: &Credential,
    backoff: &mut Backoff,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<Infallible, TransportError> {
    let settings = &shared.settings;
    let Link { outbound, mut inbound } = shared.dialer.dial(&settings.url).await?;

    let (socket_id, activity_timeout) =
        tokio::time::timeout(settings.handshake_timeout, handshake(&mut inbound))
            .await
            .map_err(|_| TransportError::Connect("handshake timed out".into()))??;

    backoff.reset();
    if !shared.transition(generation, ConnectionState::Connected, None, None) {
        return Err(TransportError::Closed("superseded".into()));
    }
    info!(socket_id = %socket_id, "realtime connected");

    // Everything registered so far is resubscribed below.
    while commands.try_recv().is_ok() {}

    let mut conn = Conn { shared, credential, socket_id, outbound, subscribed: HashSet::new() };
    for channel in shared.registered_channels(generation) {
        conn.sync(generation, channel).await?;
    }

    let activity = activity_timeout.unwrap_or(settings.activity_timeout);
    let mut awaiting_pong = false;

    loop {
        let wait = if awaiting_pong { settings.pong_timeout } else { activity };
        tokio::select! {
            Some(Command::Sync(channel)) = commands.recv() => {
                conn.sync(generation, channel).await?;
            }
            frame = tokio::time::timeout(wait, inbound.recv()) => {
                match frame {
                    Err(_) if awaiting_pong => {
                        return Err(TransportError::Closed("pong timeout".into()));
                    }
                    Err(_) => {
                        trace!("idle, pinging broker");
                        conn.send(protocol::ping_frame())?;
                        awaiting_pong = true;
                    }
                    Ok(None) => return Err(TransportError::Closed("socket closed".into())),
                    Ok(Some(text)) => {
                        awaiting_pong = false;
                        conn.handle(generation, &text)?;
                    }
                }
            }
        }
    }
}

/// Wait for `pusher:connection_established`.
async fn handshake(
    inbound: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(String, Option<std::time::Duration>), TransportError> {
    loop {
        let Some(text) = inbound.recv().await else {
            return Err(TransportError::Connect("closed during handshake".into()));
        };
        match protocol::parse_frame(&text) {
            Ok(ServerFrame::ConnectionEstablished { socket_id, activity_timeout }) => {
                return Ok((socket_id, activity_timeout.map(std::time::Duration::from_secs)));
            }
            Ok(ServerFrame::Error { code: Some(code), message }) => {
                return Err(TransportError::Protocol { code, message });
            }
            Ok(other) => trace!(?other, "frame before handshake ignored"),
            Err(e) => warn!(err = %e, "dropping malformed frame"),
        }
    }
}

struct Conn<'a> {
    shared: &'a Shared,
    credential: &'a Credential,
    socket_id: String,
    outbound: mpsc::UnboundedSender<String>,
    /// Channels the broker currently has us subscribed to on this socket.
    subscribed: HashSet<String>,
}

impl Conn<'_> {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Closed("socket writer gone".into()))
    }

    async fn sync(&mut self, generation: u64, channel: String) -> Result<(), TransportError> {
        let wanted = self.shared.is_registered(generation, &channel);
        let have = self.subscribed.contains(&channel);

        if wanted && !have {
            let auth = if protocol::requires_auth(&channel) {
                let signed = self
                    .shared
                    .authorizer
                    .authorize(self.credential, &self.socket_id, &channel)
                    .await;
                match signed {
                    Ok(auth) => Some(auth),
                    Err(e) if !e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!(
                            channel = %channel,
                            err = %e,
                            "channel authorization failed, skipping until reconnect"
                        );
                        return Ok(());
                    }
                }
            } else {
                None
            };
            self.send(protocol::subscribe_frame(&channel, auth.as_deref()))?;
            debug!(channel = %channel, "subscribed");
            self.subscribed.insert(channel);
        } else if !wanted && have {
            self.send(protocol::unsubscribe_frame(&channel))?;
            debug!(channel = %channel, "unsubscribed");
            self.subscribed.remove(&channel);
        }
        Ok(())
    }

    fn handle(&self, generation: u64, text: &str) -> Result<(), TransportError> {
        let frame = match protocol::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "dropping malformed frame");
                return Ok(());
            }
        };

        match frame {
            ServerFrame::Channel(event) => self.shared.dispatch(generation, &event),
            ServerFrame::Ping => self.send(protocol::pong_frame())?,
            ServerFrame::Pong => {}
            ServerFrame::SubscriptionSucceeded { channel } => {
                debug!(channel = %channel, "subscription confirmed");
            }
            // 4000-4099: fatal; 4100-4299: the broker is closing, reconnect.
            ServerFrame::Error { code: Some(code), message } if (4000..4300).contains(&code) => {
                return Err(TransportError::Protocol { code, message });
            }
            ServerFrame::Error { code, message } => {
                warn!(code = ?code, message = %message, "broker error");
            }
            ServerFrame::ConnectionEstablished { .. } => {
                debug!("duplicate connection_established ignored");
            }
            ServerFrame::Ignored { event } => trace!(event = %event, "ignored frame"),
        }
        Ok(())
    }
}
