// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Online-user tracking.
//!
//! Two independent inputs feed one pure reconciliation function:
//! realtime join/leave pushes (stamped on arrival) and periodic full
//! snapshots from `GET /chat/online-users` (stamped when requested).
//! Per user the most recent input wins, so a push and a snapshot refetch
//! that interleave in either order converge to the same set:
//!
//! - a push `left` newer than a snapshot's request time suppresses that user
//!   in the snapshot (the snapshot was taken before they left);
//! - a user missing from a snapshot survives only if a push confirmed them
//!   within `window` of the snapshot request (or after it).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::model::{PresenceUser, UserId};

/// A server-pushed membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined(PresenceUser),
    Left(PresenceUser),
}

impl PresenceEvent {
    pub fn user(&self) -> &PresenceUser {
        match self {
            Self::Joined(user) | Self::Left(user) => user,
        }
    }
}

/// One input to [`reconcile`].
#[derive(Debug, Clone)]
pub enum PresenceInput {
    /// A realtime push, stamped when it arrived.
    Push { event: PresenceEvent, at: Instant },
    /// A full snapshot, stamped when the request was issued.
    Snapshot { users: Vec<PresenceUser>, requested_at: Instant },
    /// Drop entries not refreshed within `stale_after` of `now`.
    Expire { now: Instant, stale_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    user: PresenceUser,
    last_seen: Instant,
    pushed_at: Option<Instant>,
}

/// Current online set plus the bookkeeping reconciliation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    online: IndexMap<UserId, Entry>,
    /// Push-`left` times, kept so an older snapshot cannot resurrect a user.
    departed: HashMap<UserId, Instant>,
}

impl PresenceSet {
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.online.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Online users in first-seen order.
    pub fn users(&self) -> Vec<PresenceUser> {
        self.online.values().map(|e| e.user.clone()).collect()
    }

    /// Whether `other` has the same members (ignoring bookkeeping).
    pub fn same_members(&self, other: &Self) -> bool {
        self.online.len() == other.online.len()
            && self
                .online
                .iter()
                .all(|(id, e)| other.online.get(id).is_some_and(|o| o.user == e.user))
    }
}

/// Apply one input to `current`, returning the reconciled set.
///
/// Pure: no clocks, timers, or I/O; all time comes from the input stamps.
/// `window` is the heartbeat interval, the grace period a push confirmation
/// outlives a snapshot that does not mention the user.
pub fn reconcile(current: &PresenceSet, input: &PresenceInput, window: Duration) -> PresenceSet {
    let mut next = current.clone();
    match input {
        PresenceInput::Push { event: PresenceEvent::Joined(user), at } => {
            if next.departed.get(&user.user_id).is_some_and(|left| left > at) {
                return next;
            }
            next.departed.remove(&user.user_id);
            let entry = next.online.entry(user.user_id.clone()).or_insert_with(|| Entry {
                user: user.clone(),
                last_seen: *at,
                pushed_at: None,
            });
            entry.user = user.clone();
            entry.last_seen = entry.last_seen.max(*at);
            entry.pushed_at = Some(entry.pushed_at.map_or(*at, |p| p.max(*at)));
        }
        PresenceInput::Push { event: PresenceEvent::Left(user), at } => {
            let joined_later = next
                .online
                .get(&user.user_id)
                .and_then(|e| e.pushed_at)
                .is_some_and(|pushed| pushed > *at);
            if joined_later {
                return next;
            }
            next.online.shift_remove(&user.user_id);
            let left = next.departed.entry(user.user_id.clone()).or_insert(*at);
            *left = (*left).max(*at);
        }
        PresenceInput::Snapshot { users, requested_at } => {
            let listed: HashSet<&UserId> = users.iter().map(|u| &u.user_id).collect();

            next.online.retain(|id, entry| {
                if listed.contains(id) {
                    return true;
                }
                entry.pushed_at.is_some_and(|p| requested_at.saturating_duration_since(p) <= window)
            });

            for user in users {
                if next.departed.get(&user.user_id).is_some_and(|left| left > requested_at) {
                    continue;
                }
                next.departed.remove(&user.user_id);
                let entry = next.online.entry(user.user_id.clone()).or_insert_with(|| Entry {
                    user: user.clone(),
                    last_seen: *requested_at,
                    pushed_at: None,
                });
                entry.user = user.clone();
                entry.last_seen = entry.last_seen.max(*requested_at);
            }

            next.departed.retain(|_, left| requested_at.saturating_duration_since(*left) <= window);
        }
        PresenceInput::Expire { now, stale_after } => {
            next.online.retain(|_, e| now.saturating_duration_since(e.last_seen) <= *stale_after);
            next.departed.retain(|_, left| now.saturating_duration_since(*left) <= *stale_after);
        }
    }
    next
}

/// Stateful wrapper around [`reconcile`]. Each call is all-or-nothing.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    set: PresenceSet,
    window: Duration,
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self { set: PresenceSet::default(), window }
    }

    /// Apply a realtime push. Returns whether the member list changed.
    pub fn apply_push(&mut self, event: PresenceEvent, at: Instant) -> bool {
        self.apply(&PresenceInput::Push { event, at })
    }

    /// Reconcile against a full snapshot. Returns whether the member list changed.
    pub fn apply_snapshot(&mut self, users: Vec<PresenceUser>, requested_at: Instant) -> bool {
        self.apply(&PresenceInput::Snapshot { users, requested_at })
    }

    /// Drop entries nobody refreshed recently. Returns whether the member list changed.
    pub fn expire(&mut self, now: Instant, stale_after: Duration) -> bool {
        self.apply(&PresenceInput::Expire { now, stale_after })
    }

    pub fn apply(&mut self, input: &PresenceInput) -> bool {
        let next = reconcile(&self.set, input, self.window);
        let changed = !next.same_members(&self.set);
        self.set = next;
        changed
    }

    pub fn set(&self) -> &PresenceSet {
        &self.set
    }

    pub fn users(&self) -> Vec<PresenceUser> {
        self.set.users()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.set.is_empty();
        self.set = PresenceSet::default();
        changed
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
