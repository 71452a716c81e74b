// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pusher protocol (v7) frame codec.
//!
//! Every frame is a JSON object `{"event", "channel"?, "data"}`. Servers
//! usually send `data` as a JSON-encoded string, so it is decoded twice.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::MalformedEvent;

pub const PROTOCOL_VERSION: u8 = 7;

const PRIVATE_PREFIX: &str = "private-";

/// An application event delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    /// Event name with any namespace stripped (`App\Events\Foo` -> `Foo`).
    pub event: String,
    pub data: Value,
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ConnectionEstablished { socket_id: String, activity_timeout: Option<u64> },
    SubscriptionSucceeded { channel: String },
    Error { code: Option<u16>, message: String },
    Ping,
    Pong,
    Channel(ChannelEvent),
    /// Protocol-internal frames this client does not act on.
    Ignored { event: String },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct Established {
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<ServerFrame, MalformedEvent> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| MalformedEvent::new("frame", e))?;

    match raw.event.as_str() {
        "pusher:connection_established" => {
            let data: Established = serde_json::from_value(decode_data(&raw.event, raw.data)?)
                .map_err(|e| MalformedEvent::new(&raw.event, e))?;
            Ok(ServerFrame::ConnectionEstablished {
                socket_id: data.socket_id,
                activity_timeout: data.activity_timeout,
            })
        }
        "pusher:error" => {
            let data: ErrorData = serde_json::from_value(decode_data(&raw.event, raw.data)?)
                .map_err(|e| MalformedEvent::new(&raw.event, e))?;
            Ok(ServerFrame::Error {
                code: data.code,
                message: data.message.unwrap_or_default(),
            })
        }
        "pusher:ping" => Ok(ServerFrame::Ping),
        "pusher:pong" => Ok(ServerFrame::Pong),
        "pusher_internal:subscription_succeeded" => {
            let channel = raw
                .channel
                .ok_or_else(|| MalformedEvent::new(&raw.event, "missing channel"))?;
            Ok(ServerFrame::SubscriptionSucceeded { channel })
        }
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            Ok(ServerFrame::Ignored { event: raw.event })
        }
        _ => {
            let channel = raw
                .channel
                .ok_or_else(|| MalformedEvent::new(&raw.event, "missing channel"))?;
            let data = decode_data(&raw.event, raw.data)?;
            Ok(ServerFrame::Channel(ChannelEvent {
                channel,
                event: normalize_event_name(&raw.event).to_owned(),
                data,
            }))
        }
    }
}

/// Decode a frame's `data`, which is either an object or a JSON string.
fn decode_data(event: &str, data: Value) -> Result<Value, MalformedEvent> {
    match data {
        Value::String(s) => serde_json::from_str(&s).map_err(|e| MalformedEvent::new(event, e)),
        other => Ok(other),
    }
}

/// Strip a broadcaster namespace or leading dot from an event name.
pub fn normalize_event_name(event: &str) -> &str {
    let event = event.strip_prefix('.').unwrap_or(event);
    match event.rfind('\\') {
        Some(i) => &event[i + 1..],
        None => event,
    }
}

/// Wire name of a private channel (`chat.1` -> `private-chat.1`).
pub fn private_channel(name: &str) -> String {
    format!("{PRIVATE_PREFIX}{name}")
}

/// Whether subscribing to `channel` needs a signature from the authorizer.
pub fn requires_auth(channel: &str) -> bool {
    channel.starts_with(PRIVATE_PREFIX) || channel.starts_with("presence-")
}

pub fn subscribe_frame(channel: &str, auth: Option<&str>) -> String {
    let mut data = json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth.to_owned());
    }
    json!({ "event": "pusher:subscribe", "data": data }).to_string()
}

pub fn unsubscribe_frame(channel: &str) -> String {
    json!({ "event": "pusher:unsubscribe", "data": { "channel": channel } }).to_string()
}

pub fn ping_frame() -> String {
    json!({ "event": "pusher:ping", "data": {} }).to_string()
}

pub fn pong_frame() -> String {
    json!({ "event": "pusher:pong", "data": {} }).to_string()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
