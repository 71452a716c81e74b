// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented terminal client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::HttpChatApi;
use crate::config::ChatConfig;
use crate::credential::{Credential, CredentialHolder};
use crate::model::{truncate_preview, ChatMessage, PresenceUser};
use crate::session::{ChatSession, JoinOutcome, LeaveOutcome, SendOutcome};
use crate::transport::{ConnectionState, StateChange};

const PREVIEW_CHARS: usize = 500;
const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Inline(String),
    File(PathBuf),
}

/// A slash command typed at the prompt, or a message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Join,
    Leave,
    Who,
    Reconnect,
    Quit,
    Unknown(&'a str),
    Message(&'a str),
}

pub fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    match trimmed {
        "/join" => Input::Join,
        "/leave" => Input::Leave,
        "/who" => Input::Who,
        "/reconnect" => Input::Reconnect,
        "/quit" | "/exit" => Input::Quit,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        _ => Input::Message(line),
    }
}

pub fn render_message(message: &ChatMessage) -> String {
    let at = message.created_at.with_timezone(&chrono::Local).format("%H:%M");
    let name = if message.author_name.is_empty() {
        message.author_id.as_str()
    } else {
        message.author_name.as_str()
    };
    format!("[{at}] {name}: {}", truncate_preview(&message.body, PREVIEW_CHARS))
}

pub fn render_presence(users: &[PresenceUser]) -> String {
    if users.is_empty() {
        return "* nobody online".to_owned();
    }
    let names: Vec<&str> = users
        .iter()
        .map(|u| {
            if u.display_name.is_empty() {
                u.user_id.as_str()
            } else {
                u.display_name.as_str()
            }
        })
        .collect();
    format!("* online ({}): {}", users.len(), names.join(", "))
}

pub fn render_state(change: &StateChange) -> String {
    match (change.current, change.retry, &change.error) {
        (ConnectionState::Reconnecting, Some(retry), _) => format!(
            "* connection lost, retry {} in {:.1}s",
            retry.attempt,
            retry.delay.as_secs_f64()
        ),
        (ConnectionState::Failed, _, Some(err)) => {
            format!("* connection failed: {err} (/reconnect to retry)")
        }
        (state, _, _) => format!("* {state}"),
    }
}

/// Run the interactive client until `/quit`, end of input, or Ctrl-C.
pub async fn run(config: ChatConfig, token: TokenSource) -> anyhow::Result<()> {
    crate::ensure_crypto_provider();
    let shutdown = CancellationToken::new();

    let holder = match token {
        TokenSource::Inline(token) => CredentialHolder::new(Credential::new(token)),
        TokenSource::File(path) => {
            let holder = CredentialHolder::new(None);
            holder.follow_file(path, TOKEN_POLL_INTERVAL, shutdown.clone());
            holder
        }
    };
    if holder.current().is_none() {
        warn!("no credential yet, waiting for one");
    }

    let session = ChatSession::http(config, Arc::clone(&holder))?;
    let _messages = session.on_message(|m| println!("{}", render_message(m)));
    let _presence = session.on_presence_change(|users| println!("{}", render_presence(users)));
    let _state = session.on_connection_state_change(|c| println!("{}", render_state(c)));
    session.start();
    join(&session).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match parse_input(&line) {
            Input::Quit => break,
            Input::Join => join(&session).await,
            Input::Leave => match session.leave().await {
                LeaveOutcome::Left(room) => println!("* left room {room}"),
                LeaveOutcome::Cancelled => println!("* join cancelled"),
                LeaveOutcome::NotJoined => println!("* not in a room"),
            },
            Input::Who => println!("{}", render_presence(&session.online_users())),
            Input::Reconnect => println!("{}", reconnect(&session)),
            Input::Unknown(cmd) => {
                println!("* unknown command {cmd} (try /join /leave /who /reconnect /quit)")
            }
            Input::Message(text) => match session.send(text).await {
                Ok(SendOutcome::Sent) => {}
                Ok(SendOutcome::Skipped) => println!("* not logged in"),
                Err(e) => println!("* {e}"),
            },
        }
    }

    info!("shutting down");
    session.dispose().await;
    shutdown.cancel();
    Ok(())
}

/// Manual retry, e.g. after the connection reached `Failed`.
fn reconnect(session: &ChatSession<HttpChatApi>) -> String {
    if session.connection_state() == ConnectionState::Connected {
        return "* already connected".to_owned();
    }
    if session.connect() {
        "* reconnecting".to_owned()
    } else {
        "* not logged in".to_owned()
    }
}

async fn join(session: &ChatSession<HttpChatApi>) {
    match session.join().await {
        Ok(JoinOutcome::Joined(room)) => println!("* joined room {room}"),
        Ok(JoinOutcome::AlreadyJoined) => println!("* already in a room"),
        Ok(JoinOutcome::Pending) => println!("* join in progress"),
        Ok(JoinOutcome::Superseded) => println!("* join cancelled"),
        Ok(JoinOutcome::Skipped) => println!("* not logged in"),
        Err(e) => println!("* {e}"),
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
