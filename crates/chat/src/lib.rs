// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatwire: client core for a realtime chat room.
//!
//! A [`session::ChatSession`] joins one room over the backend's REST API,
//! follows it through a Pusher-protocol broker, and keeps an ordered message
//! log and a reconciled online list.

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod listeners;
pub mod model;
pub mod presence;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest and tokio-tungstenite.
/// Only the first call has effect.
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
