// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered, deduplicated message log.
//!
//! Messages arrive from two sources: REST history pages and realtime pushes.
//! Either may deliver a message the other already delivered, and pages may
//! overlap pushes in time. The log keeps every id once, ordered by
//! `(created_at, seq)` where `seq` is assigned on first ingest and never
//! changes, so equal timestamps keep their arrival order across merges.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::{ChatMessage, MessageId, RoomId};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: ChatMessage,
}

impl Entry {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.message.created_at, self.seq)
    }
}

/// Message log for one room.
#[derive(Debug, Default)]
pub struct MessageStore {
    room: Option<RoomId>,
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
    next_seq: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `message` unless its id is already present.
    ///
    /// Returns whether the message was inserted. The log stays sorted.
    pub fn ingest(&mut self, message: ChatMessage) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        let entry = self.admit(message);
        // New seq is the largest, so the slot is after every entry at or
        // before this timestamp.
        let at = self.entries.partition_point(|e| e.message.created_at <= entry.message.created_at);
        self.entries.insert(at, entry);
        true
    }

    /// Ingest a history page. Each item is deduplicated like [`ingest`](Self::ingest),
    /// then the log is re-sorted. Returns the newly inserted messages in
    /// page order.
    pub fn ingest_batch(
        &mut self,
        messages: impl IntoIterator<Item = ChatMessage>,
    ) -> Vec<ChatMessage> {
        let mut added = Vec::new();
        for message in messages {
            if self.ids.contains(&message.id) {
                continue;
            }
            let entry = self.admit(message);
            added.push(entry.message.clone());
            self.entries.push(entry);
        }
        if !added.is_empty() {
            self.entries.sort_by_key(Entry::key);
        }
        added
    }

    /// Immutable ordered view for rendering.
    pub fn snapshot(&self) -> Arc<[ChatMessage]> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last().map(|e| &e.message)
    }

    /// Room the log currently holds messages for.
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Point the log at `room`, dropping everything if it held another room.
    /// Returns whether the log was cleared.
    pub fn bind_room(&mut self, room: &RoomId) -> bool {
        if self.room.as_ref() == Some(room) {
            return false;
        }
        let had_messages = !self.entries.is_empty();
        self.entries.clear();
        self.ids.clear();
        self.room = Some(room.clone());
        had_messages
    }

    fn admit(&mut self, message: ChatMessage) -> Entry {
        self.ids.insert(message.id.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        Entry { seq, message }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
