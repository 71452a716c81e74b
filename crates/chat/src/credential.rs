// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session credential holder.
//!
//! Holds the bearer token shared by the REST client and the realtime
//! transport, and broadcasts every change over a `watch` channel so dependents
//! can react to login/logout happening elsewhere. The holder is the only
//! writer; everyone else gets a read-only [`watch::Receiver`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An opaque, non-empty bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Wrap a token, rejecting blank input.
    pub fn new(token: impl AsRef<str>) -> Option<Self> {
        let token = token.as_ref().trim();
        if token.is_empty() {
            return None;
        }
        Some(Self(Arc::from(token)))
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Process-wide owner of the current credential.
pub struct CredentialHolder {
    tx: watch::Sender<Option<Credential>>,
}

impl CredentialHolder {
    pub fn new(initial: Option<Credential>) -> Arc<Self> {
        let (tx, _) = watch::channel(initial);
        Arc::new(Self { tx })
    }

    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    /// Observe credential changes. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }

    /// Replace the credential. Returns whether the value actually changed;
    /// subscribers are only woken on a change.
    pub fn replace(&self, next: Option<Credential>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Store a new token (blank tokens clear the credential).
    pub fn set(&self, token: &str) -> bool {
        self.replace(Credential::new(token))
    }

    pub fn clear(&self) -> bool {
        self.replace(None)
    }

    /// Keep the credential in sync with a token file until `shutdown`.
    ///
    /// The file holds the raw token. Writing a new token swaps the credential;
    /// truncating or deleting the file clears it. Changes are picked up through
    /// a filesystem watcher with `poll_interval` as a fallback.
    pub fn follow_file(
        self: &Arc<Self>,
        path: PathBuf,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) {
        self.replace(read_token_file(&path));

        let holder = Arc::clone(self);
        tokio::spawn(async move {
            let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
            // Keep the watcher alive for the lifetime of the task.
            let _watcher = watch_parent(&path, wake_tx);
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = wake_rx.recv() => {}
                    _ = poll.tick() => {}
                }

                let next = read_token_file(&path);
                let present = next.is_some();
                if holder.replace(next) {
                    if present {
                        info!(path = %path.display(), "credential updated from token file");
                    } else {
                        info!(
                            path = %path.display(),
                            "credential cleared (token file empty or removed)"
                        );
                    }
                }
            }
            debug!(path = %path.display(), "token file follower stopped");
        });
    }
}

/// Read a token file. Missing or blank files yield `None`.
pub fn read_token_file(path: &Path) -> Option<Credential> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Credential::new(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "failed to read token file");
            None
        }
    }
}

/// Set up a `notify` watcher on the token file's parent directory.
/// Returns the watcher handle (must be kept alive).
fn watch_parent(path: &Path, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;

    // Watch the parent directory so creation and deletion are seen too.
    let watch_path = path.parent().unwrap_or(path);
    watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;

    Some(watcher)
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
