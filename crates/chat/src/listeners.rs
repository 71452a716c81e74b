// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed callback registry with explicit unsubscribe handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<T>,
}

struct Registry<T> {
    next_id: u64,
    slots: Vec<Slot<T>>,
}

/// A set of callbacks invoked synchronously, in registration order, by
/// [`emit`](Listeners::emit).
///
/// Callbacks run without the registry lock held, so they may register or
/// remove listeners themselves. A callback never starts after its handle's
/// [`unsubscribe`](ListenerHandle::unsubscribe) (or [`clear`](Listeners::clear))
/// has returned.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 0, slots: Vec::new() })) }
    }

    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.slots.push(Slot {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        ListenerHandle {
            remove: Some(Box::new(move || {
                active.store(false, Ordering::SeqCst);
                if let Some(registry) = weak.upgrade() {
                    registry.lock().slots.retain(|s| s.id != id);
                }
            })),
        }
    }

    pub fn emit(&self, value: &T) {
        let slots: Vec<(Arc<AtomicBool>, Callback<T>)> = self
            .registry
            .lock()
            .slots
            .iter()
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
            .collect();
        for (active, callback) in slots {
            if active.load(Ordering::SeqCst) {
                callback(value);
            }
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let mut registry = self.registry.lock();
        for slot in registry.slots.drain(..) {
            slot.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned when registering a listener. Dropping it keeps the
/// listener registered; call [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;
