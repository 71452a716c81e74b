// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live realtime subscription per chat room.

use std::collections::HashMap;

use tracing::debug;

use crate::model::RoomId;
use crate::transport::protocol::private_channel;
use crate::transport::{ChannelEvent, Realtime, SubscriptionHandle};

/// Wire name of a room's private channel.
pub fn room_channel(room: &RoomId) -> String {
    private_channel(&format!("chat.{room}"))
}

/// Tracks the subscription handle of each joined room.
pub struct ChannelSubscriptions {
    realtime: Realtime,
    rooms: HashMap<RoomId, SubscriptionHandle>,
}

impl ChannelSubscriptions {
    pub fn new(realtime: Realtime) -> Self {
        Self { realtime, rooms: HashMap::new() }
    }

    /// Subscribe `handler` to the room's channel.
    ///
    /// Idempotent: while the room already has a live subscription its handle
    /// is returned and `handler` is dropped unused.
    pub fn join_channel(
        &mut self,
        room: &RoomId,
        handler: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        if let Some(handle) = self.rooms.get(room) {
            if self.realtime.is_subscribed(handle) {
                return handle.clone();
            }
            debug!(room = %room, "replacing stale room subscription");
        }
        let handle = self.realtime.subscribe(&room_channel(room), handler);
        self.rooms.insert(room.clone(), handle.clone());
        handle
    }

    /// Drop the room's subscription. Returns whether one was live.
    pub fn leave_channel(&mut self, room: &RoomId) -> bool {
        match self.rooms.remove(room) {
            Some(handle) => self.realtime.unsubscribe(&handle),
            None => false,
        }
    }

    pub fn leave_all(&mut self) {
        for (_, handle) in self.rooms.drain() {
            self.realtime.unsubscribe(&handle);
        }
    }

    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.rooms.get(room).is_some_and(|h| self.realtime.is_subscribed(h))
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }
}

#[cfg(test)]
#[path = "subscriptions_tests.rs"]
mod tests;
