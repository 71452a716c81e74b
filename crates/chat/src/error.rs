// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Connection-level failures raised by the realtime transport.
///
/// These drive [`ConnectionState`](crate::transport::ConnectionState)
/// transitions and are only surfaced to callers once the connection fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No credential (or an empty one) was supplied to `connect`.
    CredentialMissing,
    /// The broker or the channel authorizer rejected the credential.
    Unauthorized(String),
    /// The socket could not be opened or the handshake never completed.
    Connect(String),
    /// An established connection dropped.
    Closed(String),
    /// The broker sent a fatal protocol error.
    Protocol { code: u16, message: String },
}

impl TransportError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialMissing => "CREDENTIAL_MISSING",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Connect(_) => "CONNECT_FAILED",
            Self::Closed(_) => "CONNECTION_CLOSED",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
        }
    }

    /// Whether retrying with the same credential can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Closed(_) => true,
            Self::CredentialMissing | Self::Unauthorized(_) => false,
            Self::Protocol { code, .. } => !(4000..4100).contains(code),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialMissing => f.write_str("no credential available"),
            Self::Unauthorized(msg) => write!(f, "credential rejected: {msg}"),
            Self::Connect(msg) => write!(f, "connect failed: {msg}"),
            Self::Closed(msg) => write!(f, "connection closed: {msg}"),
            Self::Protocol { code, message } => write!(f, "broker error {code}: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors surfaced by [`ChatSession`](crate::session::ChatSession) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Message text failed validation; nothing was sent.
    Validation(String),
    /// The operation needs a joined room.
    NotJoined,
    /// A REST call failed. Recoverable and scoped to the one operation.
    Endpoint { endpoint: &'static str, status: Option<u16>, message: String },
    /// The transport could not be (re)connected.
    Transport(TransportError),
}

impl ChatError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotJoined => "NOT_JOINED",
            Self::Endpoint { .. } => "ENDPOINT",
            Self::Transport(_) => "TRANSPORT",
        }
    }

    pub fn endpoint(endpoint: &'static str, err: &reqwest::Error) -> Self {
        Self::Endpoint {
            endpoint,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// HTTP status of a failed endpoint call, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Endpoint { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => f.write_str(msg),
            Self::NotJoined => f.write_str("not joined to a chat room"),
            Self::Endpoint { endpoint, status: Some(code), message } => {
                write!(f, "{endpoint} failed ({code}): {message}")
            }
            Self::Endpoint { endpoint, status: None, message } => {
                write!(f, "{endpoint} failed: {message}")
            }
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<TransportError> for ChatError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// A server push that could not be decoded. Logged and dropped by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    pub event: String,
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(event: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self { event: event.into(), reason: reason.to_string() }
    }
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} event: {}", self.event, self.reason)
    }
}

impl std::error::Error for MalformedEvent {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
